//! Autonomous multi-agent deliberation engine.
//!
//! Drives a prose software-engineering task through five role-specialized
//! LLM agents to a concrete artifact set in an isolated session workspace,
//! then decides on objective test evidence whether the result is
//! acceptable. See `orchestrator` for the six-phase state machine,
//! `adapters` for the test executors, and `io::probe` for the preflight
//! capability scan.

pub mod adapters;
pub mod agents;
pub mod core;
pub mod io;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod test_support;
