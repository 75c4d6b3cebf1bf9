//! Backend for OpenAI-compatible `/chat/completions` endpoints.
//!
//! The full running history is sent with each request, preceded by the
//! optional system prompt. Both sides of a successful exchange are recorded.
//! The transcript lock is held for the whole exchange, so concurrent
//! connections sharing one identity take turns.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BackendError, BackendReply, ConversationBackend, HistoryEntry, Transcript};
use crate::codec::Sender;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Rebot, a supportive recovery assistant. \
Listen carefully, respond with empathy, and encourage healthy coping strategies. \
You are not a substitute for professional care; suggest reaching out to a professional \
or a crisis line when the user may be at risk.";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    /// Base URL, without the `/chat/completions` suffix.
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
    pub timeout: Duration,
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ChatCompletionsConfig {
    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn role_for(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "user",
        Sender::Therapist => "assistant",
    }
}

pub struct ChatCompletionsBackend {
    config: ChatCompletionsConfig,
    agent: ureq::Agent,
    transcript: Transcript,
}

impl ChatCompletionsBackend {
    pub fn new(config: ChatCompletionsConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            config,
            agent,
            transcript: Transcript::new(),
        }
    }

    pub fn config(&self) -> &ChatCompletionsConfig {
        &self.config
    }
}

impl ConversationBackend for ChatCompletionsBackend {
    fn reply(&self, text: &str) -> Result<BackendReply, BackendError> {
        let mut entries = self.transcript.lock()?;

        let response: ChatResponse = {
            let mut messages = Vec::with_capacity(entries.len() + 2);
            if let Some(prompt) = &self.config.system_prompt {
                messages.push(ChatMessage {
                    role: "system",
                    content: prompt,
                });
            }
            for entry in entries.iter() {
                messages.push(ChatMessage {
                    role: role_for(entry.sender),
                    content: &entry.content,
                });
            }
            messages.push(ChatMessage {
                role: "user",
                content: text,
            });

            let request = ChatRequest {
                model: &self.config.model,
                messages,
            };

            let mut call = self.agent.post(&self.config.endpoint());
            if let Some(key) = &self.config.api_key {
                call = call.set("Authorization", &format!("Bearer {key}"));
            }

            call.send_json(&request)
                .map_err(|e| BackendError::Unavailable(e.to_string()))?
                .into_json()
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
        };

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty());

        entries.push(HistoryEntry::now(Sender::User, text));
        match &reply {
            Some(content) => entries.push(HistoryEntry::now(Sender::Therapist, content.clone())),
            None => log::warn!("Chat completion for model {} had no content", self.config.model),
        }

        Ok(BackendReply { reply })
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, BackendError> {
        self.transcript.snapshot()
    }

    fn clear_history(&self) -> Result<(), BackendError> {
        self.transcript.clear()
    }
}
