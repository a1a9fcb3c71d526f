//! Pure, deterministic building blocks of the deliberation engine.

pub mod consensus;
pub mod error;
pub mod extract;
pub mod types;
