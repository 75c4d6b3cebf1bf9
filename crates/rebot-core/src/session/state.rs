//! Per-session state and identity resolution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ConversationBackend;

/// Identity a conversation is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity candidates the transport collected for a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Explicit `user_id` route parameter.
    pub user_id: Option<String>,
    /// Principal vouched for by an upstream authenticator.
    pub authenticated_user: Option<String>,
    /// Room (channel) the client connected to.
    pub room_name: Option<String>,
}

/// Where a session's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    RouteParameter,
    AuthenticatedUser,
    RoomName,
}

impl std::fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IdentitySource::RouteParameter => "route parameter",
            IdentitySource::AuthenticatedUser => "authenticated user",
            IdentitySource::RoomName => "room name",
        };
        f.write_str(name)
    }
}

/// Rules for choosing an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPolicy {
    /// Use the room name when no user identity is available. Everyone
    /// connecting to the same room then shares one conversation.
    pub allow_room_fallback: bool,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            allow_room_fallback: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no identity available for this connection")]
    Missing,

    #[error("no user identity available and room fallback is disabled")]
    FallbackDisabled,
}

fn non_empty(candidate: &Option<String>) -> Option<&str> {
    candidate
        .as_deref()
        .filter(|value| !value.trim().is_empty())
}

impl SessionId {
    /// Pick the identity for a connection.
    ///
    /// Priority: route parameter, then authenticated user, then room name.
    /// Blank candidates are skipped.
    pub fn resolve(
        info: &ConnectInfo,
        policy: &IdentityPolicy,
    ) -> Result<(SessionId, IdentitySource), IdentityError> {
        if let Some(user_id) = non_empty(&info.user_id) {
            return Ok((SessionId(user_id.to_string()), IdentitySource::RouteParameter));
        }
        if let Some(user) = non_empty(&info.authenticated_user) {
            return Ok((SessionId(user.to_string()), IdentitySource::AuthenticatedUser));
        }
        match non_empty(&info.room_name) {
            Some(_) if !policy.allow_room_fallback => Err(IdentityError::FallbackDisabled),
            Some(room) => {
                log::warn!(
                    "No user identity for connection to room {}; sessions in this room share one conversation",
                    room
                );
                Ok((SessionId(room.to_string()), IdentitySource::RoomName))
            }
            None => Err(IdentityError::Missing),
        }
    }
}

/// State owned by one open connection.
pub struct SessionState {
    pub identity: SessionId,

    /// Whether the backend had no history when the session opened.
    /// Computed once; later changes to the history do not affect it.
    pub history_empty_at_start: bool,

    backend: Arc<dyn ConversationBackend>,
}

impl SessionState {
    pub fn new(
        identity: SessionId,
        history_empty_at_start: bool,
        backend: Arc<dyn ConversationBackend>,
    ) -> Self {
        Self {
            identity,
            history_empty_at_start,
            backend,
        }
    }

    pub fn backend(&self) -> &dyn ConversationBackend {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("identity", &self.identity)
            .field("history_empty_at_start", &self.history_empty_at_start)
            .finish_non_exhaustive()
    }
}
