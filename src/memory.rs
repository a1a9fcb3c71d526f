//! Append-only shared conversation memory for one session.
//!
//! Every agent sees a monotonically growing, consistent view of the
//! deliberation. Messages are durably appended to `conversation.jsonl`
//! before the next agent's prompt is built; nothing is ever edited or
//! deleted.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::core::types::{AgentName, Implementation, Message, MessageRole};
use crate::io::session::append_jsonl;

pub struct SharedMemory {
    messages: Vec<Message>,
    log_path: PathBuf,
}

impl SharedMemory {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            messages: Vec::new(),
            log_path,
        }
    }

    /// Post a message: stamp it, push it, and write it through to the
    /// conversation log. Timestamps never move backwards even if the wall
    /// clock does.
    pub fn post(
        &mut self,
        from_agent: AgentName,
        role: MessageRole,
        message_type: &str,
        content: serde_json::Value,
    ) -> Result<&Message> {
        let mut timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Some(last) = self.messages.last()
            && timestamp < last.timestamp
        {
            timestamp = last.timestamp.clone();
        }
        let message = Message {
            from_agent,
            role,
            message_type: message_type.to_string(),
            content,
            timestamp,
        };
        append_jsonl(&self.log_path, &message)?;
        self.messages.push(message);
        Ok(self.messages.last().expect("just pushed"))
    }

    /// Read-only view of the log, order preserved, with an optional tail
    /// window and role filter.
    pub fn history(&self, last_n: Option<usize>, roles: Option<&[MessageRole]>) -> Vec<&Message> {
        let filtered: Vec<&Message> = self
            .messages
            .iter()
            .filter(|msg| roles.is_none_or(|roles| roles.contains(&msg.role)))
            .collect();
        match last_n {
            Some(n) if n < filtered.len() => filtered[filtered.len() - n..].to_vec(),
            _ => filtered,
        }
    }

    /// The most recent complete implementation, if the Coder has produced
    /// one.
    pub fn latest_implementation(&self) -> Option<Implementation> {
        self.messages
            .iter()
            .rev()
            .find(|msg| msg.role == MessageRole::Implementation)
            .and_then(|msg| serde_json::from_value(msg.content.clone()).ok())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
