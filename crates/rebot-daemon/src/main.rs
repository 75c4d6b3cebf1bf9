//! Rebot daemon: serves recovery-assistant chat sessions over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rebot_core::backend::{
    ChatCompletionsBackend, ChatCompletionsConfig, EchoBackend, RegistryLimits,
    DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT,
};
use rebot_core::{BackendRegistry, ConversationBackend, IdentityPolicy};
use rebot_http::{HttpConfig, SharedState, DEFAULT_AUTH_HEADER};

/// Which conversation backend answers user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Repeat the user's message (local development).
    Echo,
    /// OpenAI-compatible `/chat/completions` endpoint.
    ChatCompletions,
}

#[derive(Parser, Debug)]
#[command(name = "rebot-daemon", about = "Rebot WebSocket session server")]
struct Args {
    /// Host to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[arg(long, value_enum, default_value_t = BackendKind::Echo)]
    backend: BackendKind,

    /// Base URL of the chat completions API.
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Environment variable holding the API key.
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Override the built-in system prompt.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Timeout for a single backend request.
    #[arg(long, default_value_t = 60)]
    request_timeout_secs: u64,

    /// Trusted header carrying the authenticated user id.
    #[arg(long, default_value = DEFAULT_AUTH_HEADER)]
    auth_header: String,

    /// Ignore authentication headers entirely.
    #[arg(long)]
    no_auth_header: bool,

    /// Refuse connections that only identify a room, not a user.
    #[arg(long)]
    no_room_fallback: bool,

    /// Most conversations kept in memory at once.
    #[arg(long, default_value_t = 1000)]
    max_conversations: usize,

    /// Drop a conversation this long after its last connection closed.
    #[arg(long, default_value_t = 1800)]
    conversation_ttl_secs: u64,
}

impl Args {
    fn http_config(&self) -> HttpConfig {
        HttpConfig {
            auth_header: (!self.no_auth_header).then(|| self.auth_header.clone()),
            identity_policy: IdentityPolicy {
                allow_room_fallback: !self.no_room_fallback,
            },
        }
    }

    fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_identities: self.max_conversations,
            idle_ttl: Duration::from_secs(self.conversation_ttl_secs),
        }
    }

    fn chat_config(&self, api_key: Option<String>) -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            api_base: self.api_base.clone(),
            model: self.model.clone(),
            api_key,
            system_prompt: Some(
                self.system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            ),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

fn build_backends(args: &Args) -> BackendRegistry {
    let registry = match args.backend {
        BackendKind::Echo => BackendRegistry::new(|_| {
            Ok(Arc::new(EchoBackend::new()) as Arc<dyn ConversationBackend>)
        }),
        BackendKind::ChatCompletions => {
            let api_key = std::env::var(&args.api_key_env)
                .ok()
                .filter(|key| !key.is_empty());
            if api_key.is_none() {
                log::warn!(
                    "{} is not set, sending requests without an API key",
                    args.api_key_env
                );
            }
            let config = args.chat_config(api_key);
            log::info!("Using chat completions backend {} ({})", config.api_base, config.model);
            BackendRegistry::new(move |_| {
                Ok(Arc::new(ChatCompletionsBackend::new(config.clone()))
                    as Arc<dyn ConversationBackend>)
            })
        }
    };
    registry.with_limits(args.registry_limits())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!("Starting with {:?}", args);

    let state = Arc::new(SharedState::new(
        Arc::new(build_backends(&args)),
        args.http_config(),
    ));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rebot_http::serve(listener, state, shutdown_signal()).await {
        log::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebot_core::{BackendProvider, SessionId};

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("rebot-daemon").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 8000);
        assert_eq!(args.backend, BackendKind::Echo);
        assert_eq!(args.api_base, DEFAULT_API_BASE);

        let config = args.http_config();
        assert_eq!(config.auth_header.as_deref(), Some(DEFAULT_AUTH_HEADER));
        assert!(config.identity_policy.allow_room_fallback);
    }

    #[test]
    fn parses_backend_names() {
        let args = parse(&["--backend", "chat-completions", "--model", "llama3"]);
        assert_eq!(args.backend, BackendKind::ChatCompletions);
        assert_eq!(args.model, "llama3");
        assert!(Args::try_parse_from(["rebot-daemon", "--backend", "oracle"]).is_err());
    }

    #[test]
    fn identity_flags() {
        let config = parse(&["--no-auth-header", "--no-room-fallback"]).http_config();
        assert!(config.auth_header.is_none());
        assert!(!config.identity_policy.allow_room_fallback);

        let config = parse(&["--auth-header", "x-remote-user"]).http_config();
        assert_eq!(config.auth_header.as_deref(), Some("x-remote-user"));
    }

    #[test]
    fn chat_config_uses_overrides() {
        let args = parse(&[
            "--api-base",
            "http://localhost:11434/v1",
            "--system-prompt",
            "be brief",
            "--request-timeout-secs",
            "5",
        ]);
        let config = args.chat_config(Some("sk-test".to_string()));
        assert_eq!(config.api_base, "http://localhost:11434/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn chat_config_defaults_system_prompt() {
        let config = parse(&[]).chat_config(None);
        assert_eq!(config.system_prompt.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
    }

    #[test]
    fn conversation_limits() {
        assert_eq!(parse(&[]).registry_limits(), RegistryLimits::default());

        let registry = build_backends(&parse(&[
            "--max-conversations",
            "10",
            "--conversation-ttl-secs",
            "90",
        ]));
        assert_eq!(
            registry.limits(),
            RegistryLimits {
                max_identities: 10,
                idle_ttl: Duration::from_secs(90),
            }
        );
    }

    #[test]
    fn echo_backends_are_per_identity() {
        let registry = build_backends(&parse(&[]));
        let backend = registry.bind(&SessionId("u1".to_string())).unwrap();
        let reply = backend.reply("hi").unwrap();
        assert_eq!(reply.into_usable(), Some("You said: hi".to_string()));
        assert_eq!(registry.len(), 1);
    }
}
