//! Conversation backend contract and bundled implementations.
//!
//! The session protocol never generates replies itself. It talks to a
//! [`ConversationBackend`] bound to the session identity through a
//! [`BackendProvider`]:
//!
//! - [`BackendRegistry`] caches one backend per identity, built by a factory,
//!   and evicts idle ones
//! - [`EchoBackend`] repeats the user's text back (local development)
//! - [`ChatCompletionsBackend`] calls an OpenAI-compatible HTTP endpoint
//!
//! Backends are shared (`Arc`) and take `&self`, so implementations guard
//! their own state. Calls may block for the duration of a generation.

mod chat_completions;
mod echo;
mod registry;
mod transcript;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::Sender;
use crate::session::SessionId;

pub use chat_completions::{
    ChatCompletionsBackend, ChatCompletionsConfig, DEFAULT_API_BASE, DEFAULT_MODEL,
    DEFAULT_SYSTEM_PROMPT,
};
pub use echo::EchoBackend;
pub use registry::{BackendFactory, BackendRegistry, RegistryLimits};
pub use transcript::Transcript;

/// One prior message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    /// Entry stamped with the current time.
    pub fn now(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Result of a `reply` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReply {
    #[serde(default)]
    pub reply: Option<String>,
}

impl BackendReply {
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }

    /// An empty reply.
    pub fn none() -> Self {
        Self::default()
    }

    /// The reply text, if there is a non-empty one.
    pub fn into_usable(self) -> Option<String> {
        self.reply.filter(|reply| !reply.is_empty())
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("conversation state lock poisoned")]
    Poisoned,
}

/// A stateful conversational engine for one identity.
pub trait ConversationBackend: Send + Sync {
    /// Generate a reply to `text`, recording the exchange in the history.
    fn reply(&self, text: &str) -> Result<BackendReply, BackendError>;

    /// All prior exchanges, oldest first.
    fn history(&self) -> Result<Vec<HistoryEntry>, BackendError>;

    fn clear_history(&self) -> Result<(), BackendError>;
}

/// Resolves the backend a session should talk to.
pub trait BackendProvider: Send + Sync {
    fn bind(&self, identity: &SessionId) -> Result<Arc<dyn ConversationBackend>, BackendError>;

    /// Called once a connection bound to `identity` has closed.
    fn release(&self, _identity: &SessionId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usable_reply_requires_text() {
        assert_eq!(
            BackendReply::text("hi there").into_usable(),
            Some("hi there".to_string())
        );
        assert_eq!(BackendReply::text("").into_usable(), None);
        assert_eq!(BackendReply::none().into_usable(), None);
    }

    #[test]
    fn reply_deserializes_without_field() {
        let reply: BackendReply = serde_json::from_str("{}").unwrap();
        assert_eq!(reply, BackendReply::none());

        let reply: BackendReply = serde_json::from_str(r#"{"reply":"ok"}"#).unwrap();
        assert_eq!(reply.into_usable(), Some("ok".to_string()));
    }

    #[test]
    fn history_entry_now_is_timestamped() {
        let entry = HistoryEntry::now(Sender::User, "hello");
        assert_eq!(entry.sender, Sender::User);
        assert_eq!(entry.content, "hello");
        assert!(entry.timestamp.is_some());
    }

    #[test]
    fn history_entry_omits_missing_timestamp() {
        let entry = HistoryEntry {
            sender: Sender::Therapist,
            content: "hi".to_string(),
            timestamp: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"sender":"therapist","content":"hi"}"#);
    }
}
