//! HTTP server exposing Rebot sessions over WebSocket.
//!
//! Clients connect to `/ws/rebot/{room_name}` or
//! `/ws/rebot/{room_name}/{user_id}` (trailing slash optional) and exchange
//! JSON frames with a [`rebot_core::SessionProtocol`].

mod state;
mod websocket;

use axum::{routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use state::{HttpConfig, SharedState, DEFAULT_AUTH_HEADER};

/// Build the application router.
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/ws/rebot/{room_name}", get(websocket::room_handler))
        .route("/ws/rebot/{room_name}/", get(websocket::room_handler))
        .route("/ws/rebot/{room_name}/{user_id}", get(websocket::user_handler))
        .route("/ws/rebot/{room_name}/{user_id}/", get(websocket::user_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<SharedState>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("HTTP server listening on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("HTTP server shutting down");
        })
        .await
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rebot_core::backend::EchoBackend;
    use rebot_core::{BackendRegistry, ConversationBackend};

    fn test_state() -> Arc<SharedState> {
        let registry = BackendRegistry::new(|_| {
            Ok(Arc::new(EchoBackend::new()) as Arc<dyn ConversationBackend>)
        });
        Arc::new(SharedState::new(Arc::new(registry), HttpConfig::default()))
    }

    #[test]
    fn default_config_trusts_auth_header() {
        let config = HttpConfig::default();
        assert_eq!(config.auth_header.as_deref(), Some(DEFAULT_AUTH_HEADER));
        assert!(config.identity_policy.allow_room_fallback);
    }

    #[tokio::test]
    async fn server_starts_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve(listener, test_state(), async {
            stop_rx.await.ok();
        }));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
