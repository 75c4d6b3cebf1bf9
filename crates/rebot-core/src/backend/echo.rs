//! Development backend that repeats the user's text.

use super::{BackendError, BackendReply, ConversationBackend, HistoryEntry, Transcript};
use crate::codec::Sender;

/// Replies with `You said: <text>` and keeps an in-memory history.
#[derive(Debug, Default)]
pub struct EchoBackend {
    transcript: Transcript,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationBackend for EchoBackend {
    fn reply(&self, text: &str) -> Result<BackendReply, BackendError> {
        let reply = format!("You said: {text}");
        let mut entries = self.transcript.lock()?;
        entries.push(HistoryEntry::now(Sender::User, text));
        entries.push(HistoryEntry::now(Sender::Therapist, reply.clone()));
        Ok(BackendReply::text(reply))
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, BackendError> {
        self.transcript.snapshot()
    }

    fn clear_history(&self) -> Result<(), BackendError> {
        self.transcript.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_text() {
        let backend = EchoBackend::new();
        let reply = backend.reply("hello").unwrap();
        assert_eq!(reply.into_usable(), Some("You said: hello".to_string()));
    }

    #[test]
    fn records_both_sides() {
        let backend = EchoBackend::new();
        backend.reply("hello").unwrap();

        let history = backend.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].sender, Sender::Therapist);
        assert_eq!(history[1].content, "You said: hello");
    }

    #[test]
    fn clear_history_empties_log() {
        let backend = EchoBackend::new();
        backend.reply("hello").unwrap();
        backend.clear_history().unwrap();
        assert!(backend.history().unwrap().is_empty());
    }
}
