//! Test-only helpers: a scripted LLM client and capability builders.
//!
//! Exported from the library so integration tests under `tests/` can drive
//! full sessions without network access.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::Result;

use crate::core::error::EngineError;
use crate::io::llm::{LlmClient, LlmRequest};
use crate::io::probe::{EnvironmentCapabilities, LanguageCaps, Languages};

/// One scripted reply from the fake LLM.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    TransportError(String),
    Timeout,
}

/// LLM client that replays a fixed script and records every prompt.
///
/// Replies are consumed in order; running past the end of the script is a
/// transport error so a test that under-provisions its script fails loudly.
pub struct ScriptedLlm {
    replies: RefCell<VecDeque<ScriptedReply>>,
    prompts: RefCell<Vec<String>>,
    default_error: Option<String>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<String>) -> Self {
        Self::from_script(replies.into_iter().map(ScriptedReply::Text).collect())
    }

    pub fn from_script(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
            default_error: None,
        }
    }

    /// A client whose every call fails with a transport error.
    pub fn failing(message: &str) -> Self {
        Self {
            replies: RefCell::new(VecDeque::new()),
            prompts: RefCell::new(Vec::new()),
            default_error: Some(message.to_string()),
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    /// The user prompt of call `index`.
    pub fn prompt(&self, index: usize) -> Option<String> {
        self.prompts.borrow().get(index).cloned()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, request: &LlmRequest) -> Result<String> {
        self.prompts.borrow_mut().push(request.user_prompt.clone());
        if let Some(message) = &self.default_error {
            return Err(EngineError::LlmTransport(message.clone()).into());
        }
        match self.replies.borrow_mut().pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text.trim().to_string()),
            Some(ScriptedReply::TransportError(message)) => {
                Err(EngineError::LlmTransport(message).into())
            }
            Some(ScriptedReply::Timeout) => Err(EngineError::LlmTimeout {
                timeout_secs: request.timeout.as_secs(),
            }
            .into()),
            None => Err(EngineError::LlmTransport("scripted llm exhausted".to_string()).into()),
        }
    }
}

/// Capabilities for a host with Python only: no Docker, no GPU, no network.
pub fn python_only_caps() -> EnvironmentCapabilities {
    let mut caps = EnvironmentCapabilities {
        languages: Languages {
            python: LanguageCaps {
                available: true,
                version: Some("Python 3.12.0".to_string()),
                command: Some(detect_python().unwrap_or_else(|| "python3".to_string())),
            },
            ..Languages::default()
        },
        ..EnvironmentCapabilities::default()
    };
    caps.summary = "python only".to_string();
    caps
}

/// Find a working Python binary, if this host has one.
pub fn detect_python() -> Option<String> {
    for candidate in ["python3", "python"] {
        let status = std::process::Command::new(candidate)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        if matches!(status, Ok(status) if status.success()) {
            return Some(candidate.to_string());
        }
    }
    None
}
