//! Per-connection sessions.
//!
//! A session lives exactly as long as its connection: the transport opens
//! it after accepting the socket, feeds it frames one at a time, and closes
//! it when the socket goes away. Nothing is shared between sessions except
//! the backend bound to their identity.

mod protocol;
mod state;

pub use protocol::{
    DispatchError, OpenError, SessionProtocol, FALLBACK_REPLY, GREETING, HISTORY_CLEARED,
};
pub use state::{
    ConnectInfo, IdentityError, IdentityPolicy, IdentitySource, SessionId, SessionState,
};
