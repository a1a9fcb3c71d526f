//! Engine error taxonomy.
//!
//! Errors are reserved for conditions the orchestrator cannot usefully
//! continue past. Test failures and adapter timeouts are values
//! ([`crate::core::types::TestRecord`]), never errors.

use thiserror::Error;

/// A failure the deliberation engine must react to.
///
/// Carried through `anyhow` and recovered at policy boundaries via
/// `downcast_ref::<EngineError>()`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An LLM call exceeded its timeout.
    #[error("llm call timed out after {timeout_secs}s")]
    LlmTimeout { timeout_secs: u64 },

    /// Network or vendor-side failure on an LLM call.
    #[error("llm transport error: {0}")]
    LlmTransport(String),

    /// Missing or invalid credentials. Never retried.
    #[error("llm auth error: {0}")]
    LlmAuth(String),

    /// The agent reply could not be parsed or did not match its shape.
    /// Carries a truncated copy of the raw text for diagnostics.
    #[error("malformed agent output: {detail}")]
    MalformedAgentOutput { detail: String, raw: String },

    /// Cannot create, write, or rename a workspace or artifact file. Fatal.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// A subprocess failed to launch (distinct from a failing test).
    #[error("subprocess launch failed: {0}")]
    SubprocessLaunch(String),

    /// Invalid configuration, detected at session start. Never retried.
    #[error("config error: {0}")]
    Config(String),

    /// External stop requested.
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Stable kind label recorded in `verdict.json` error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::LlmTimeout { .. } => "llm_timeout",
            EngineError::LlmTransport(_) => "llm_transport",
            EngineError::LlmAuth(_) => "llm_auth",
            EngineError::MalformedAgentOutput { .. } => "malformed_agent_output",
            EngineError::Filesystem(_) => "filesystem",
            EngineError::SubprocessLaunch(_) => "subprocess_launch",
            EngineError::Config(_) => "config",
            EngineError::Cancelled => "cancelled",
        }
    }

    /// Whether one in-place retry with the same prompt is warranted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LlmTimeout { .. }
                | EngineError::LlmTransport(_)
                | EngineError::MalformedAgentOutput { .. }
        )
    }

    pub fn malformed(detail: impl Into<String>, raw: &str) -> Self {
        const RAW_LIMIT: usize = 1000;
        let mut raw = raw.to_string();
        if raw.len() > RAW_LIMIT {
            let cut = (0..=RAW_LIMIT).rev().find(|i| raw.is_char_boundary(*i));
            raw.truncate(cut.unwrap_or(0));
            raw.push_str("...");
        }
        EngineError::MalformedAgentOutput {
            detail: detail.into(),
            raw,
        }
    }
}
