//! In-memory conversation history shared by the bundled backends.

use std::sync::{Mutex, MutexGuard};

use super::{BackendError, HistoryEntry};

/// Mutex-guarded message log.
///
/// Holding the guard from [`Transcript::lock`] across a generation call
/// serializes exchanges for the identity that owns the transcript.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Vec<HistoryEntry>>, BackendError> {
        self.entries.lock().map_err(|_| BackendError::Poisoned)
    }

    pub fn push(&self, entry: HistoryEntry) -> Result<(), BackendError> {
        self.lock()?.push(entry);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<HistoryEntry>, BackendError> {
        Ok(self.lock()?.clone())
    }

    pub fn clear(&self) -> Result<(), BackendError> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize, BackendError> {
        Ok(self.lock()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Sender;

    #[test]
    fn starts_empty() {
        let transcript = Transcript::new();
        assert_eq!(transcript.len().unwrap(), 0);
        assert!(transcript.snapshot().unwrap().is_empty());
    }

    #[test]
    fn keeps_insertion_order() {
        let transcript = Transcript::new();
        transcript
            .push(HistoryEntry::now(Sender::User, "first"))
            .unwrap();
        transcript
            .push(HistoryEntry::now(Sender::Therapist, "second"))
            .unwrap();

        let entries = transcript.snapshot().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "first");
        assert_eq!(entries[1].content, "second");
    }

    #[test]
    fn clear_removes_everything() {
        let transcript = Transcript::new();
        transcript.push(HistoryEntry::now(Sender::User, "x")).unwrap();
        transcript.clear().unwrap();
        assert_eq!(transcript.len().unwrap(), 0);
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let transcript = std::sync::Arc::new(Transcript::new());
        let clone = std::sync::Arc::clone(&transcript);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(transcript.snapshot(), Err(BackendError::Poisoned)));
    }
}
