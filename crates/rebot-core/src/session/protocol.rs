//! The session protocol: lifecycle and frame dispatch.
//!
//! Dispatch is stateless over a stateful backend. Each frame is handled on
//! its own, based only on its `type`:
//!
//! | inbound         | backend call      | outbound                          |
//! |-----------------|-------------------|-----------------------------------|
//! | `message`       | `reply(content)`  | `message` from the therapist      |
//! | `clear_history` | `clear_history()` | `system` acknowledgement          |
//! | `export_chat`   | `history()`       | `export` (nothing if format unknown) |
//! | anything else   | none              | nothing                           |
//!
//! A frame that fails to decode gets a single `error` frame and never
//! reaches the backend. A backend or export failure gets an `error` frame
//! describing it. A backend that panics is treated the same way. Neither
//! ends the session.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use super::state::{SessionId, SessionState};
use crate::backend::{BackendError, BackendProvider, ConversationBackend};
use crate::codec::{self, DecodeError, Inbound, Outbound};
use crate::export::{self, ExportError, ExportFormat};

/// Sent once when a session opens on an empty history.
pub const GREETING: &str = "Hello! I'm your recovery assistant. How can I help you today?";

/// Sent in place of an empty backend reply.
pub const FALLBACK_REPLY: &str = "I'm sorry, I couldn't process that.";

pub const HISTORY_CLEARED: &str = "Conversation history cleared";

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("failed to bind backend: {0}")]
    Bind(BackendError),

    #[error("failed to read conversation history: {0}")]
    History(BackendError),
}

/// Failure while acting on a well-formed frame.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("backend panicked: {0}")]
    Panicked(String),
}

/// One open session.
///
/// Frame handlers take `&mut self`: a session handles one frame at a time.
#[derive(Debug)]
pub struct SessionProtocol {
    state: SessionState,
}

impl SessionProtocol {
    /// Open a session for an accepted connection.
    ///
    /// Returns the session and, when the backend history is empty, the
    /// greeting frame to send before anything else.
    pub fn open(
        identity: SessionId,
        provider: &dyn BackendProvider,
    ) -> Result<(Self, Option<Outbound>), OpenError> {
        let backend = provider.bind(&identity).map_err(OpenError::Bind)?;
        Self::with_backend(identity, backend)
    }

    /// Open a session on an already bound backend.
    pub fn with_backend(
        identity: SessionId,
        backend: Arc<dyn ConversationBackend>,
    ) -> Result<(Self, Option<Outbound>), OpenError> {
        let history_empty = backend
            .history()
            .map_err(OpenError::History)?
            .is_empty();

        let state = SessionState::new(identity, history_empty, backend);
        log::info!(
            "Session opened for {} (new conversation: {})",
            state.identity,
            history_empty
        );

        let greeting = history_empty.then(|| Outbound::therapist(GREETING));
        Ok((Self { state }, greeting))
    }

    pub fn identity(&self) -> &SessionId {
        &self.state.identity
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Handle one text frame. Returns the frame to send back, if any.
    pub fn handle_frame(&mut self, raw: &str) -> Option<Outbound> {
        self.handle_decoded(codec::decode(raw))
    }

    /// Handle one binary frame holding UTF-8 JSON.
    pub fn handle_bytes(&mut self, raw: &[u8]) -> Option<Outbound> {
        self.handle_decoded(codec::decode_bytes(raw))
    }

    fn handle_decoded(&mut self, decoded: Result<Inbound, DecodeError>) -> Option<Outbound> {
        let inbound = match decoded {
            Ok(inbound) => inbound,
            Err(e) => {
                log::warn!("Session {}: malformed frame: {}", self.state.identity, e);
                return Some(Outbound::error(codec::INVALID_FORMAT));
            }
        };

        let dispatched = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(inbound)))
            .unwrap_or_else(|payload| Err(DispatchError::Panicked(panic_message(payload))));

        match dispatched {
            Ok(outbound) => outbound,
            Err(e) => {
                log::error!("Session {}: {}", self.state.identity, e);
                Some(Outbound::error(format!("Error processing message: {e}")))
            }
        }
    }

    fn dispatch(&self, inbound: Inbound) -> Result<Option<Outbound>, DispatchError> {
        let backend = self.state.backend();

        match inbound {
            Inbound::Message { content } => {
                log::debug!("Session {}: message ({} bytes)", self.state.identity, content.len());
                let reply = backend.reply(&content)?;
                let text = reply
                    .into_usable()
                    .unwrap_or_else(|| FALLBACK_REPLY.to_string());
                Ok(Some(Outbound::therapist(text)))
            }

            Inbound::ClearHistory => {
                backend.clear_history()?;
                log::info!("Session {}: history cleared", self.state.identity);
                Ok(Some(Outbound::system(HISTORY_CLEARED)))
            }

            Inbound::ExportChat { format } => {
                let Some(format) = ExportFormat::parse(&format) else {
                    log::debug!(
                        "Session {}: ignoring export in unsupported format {:?}",
                        self.state.identity,
                        format
                    );
                    return Ok(None);
                };
                let history = backend.history()?;
                let content = export::render(format, &history)?;
                Ok(Some(Outbound::export(format.as_str(), content)))
            }

            Inbound::Unknown { kind } => {
                log::debug!(
                    "Session {}: ignoring frame with type {:?}",
                    self.state.identity,
                    kind
                );
                Ok(None)
            }
        }
    }

    /// Close the session. The backend, and its history, outlive it.
    pub fn close(self, code: Option<u16>) {
        log::info!(
            "Session closed for {} (code: {:?})",
            self.state.identity,
            code
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
