//! # rebot-core
//!
//! Session protocol core for Rebot, the recovery-assistant chat server.
//!
//! This crate is framework-agnostic and can be driven by any transport
//! that delivers discrete text frames (the HTTP crate uses axum WebSockets).
//!
//! ## Key Concepts
//!
//! - **Session**: one connection and the conversation state bound to it
//! - **Frame**: one JSON envelope exchanged over the connection
//! - **ConversationBackend**: the reply engine, keyed by session identity
//! - **Transcript export**: the backend history rendered as JSON or text

pub mod backend;
pub mod codec;
pub mod export;
pub mod session;

// Re-export commonly used types
pub use backend::{BackendError, BackendProvider, BackendRegistry, ConversationBackend};
pub use codec::{Inbound, Outbound};
pub use session::{ConnectInfo, IdentityPolicy, SessionId, SessionProtocol};
