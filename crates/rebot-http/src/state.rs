//! Shared state for the HTTP server.
//!
//! Wraps the backend provider and the connection settings handlers need.

use rebot_core::{BackendProvider, IdentityPolicy};
use std::sync::Arc;

/// Header an upstream authenticator sets to the verified user id.
pub const DEFAULT_AUTH_HEADER: &str = "x-authenticated-user";

/// Connection settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Trusted header carrying the authenticated user, if any.
    /// `None` ignores authentication headers entirely.
    pub auth_header: Option<String>,

    pub identity_policy: IdentityPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            auth_header: Some(DEFAULT_AUTH_HEADER.to_string()),
            identity_policy: IdentityPolicy::default(),
        }
    }
}

/// Shared state available to all HTTP handlers.
#[derive(Clone)]
pub struct SharedState {
    /// Resolves the conversation backend for each session identity.
    pub backends: Arc<dyn BackendProvider>,
    pub config: HttpConfig,
}

impl SharedState {
    pub fn new(backends: Arc<dyn BackendProvider>, config: HttpConfig) -> Self {
        Self { backends, config }
    }
}
