//! Transcript export renderers.
//!
//! # Formats
//!
//! - `json`: pretty-printed array of `{sender, content, timestamp?}` in
//!   history order. Timestamps are RFC 3339 UTC strings with milliseconds.
//! - `text`: one line per entry, `[<timestamp>] <Speaker>: <content>`.
//!   The bracketed timestamp is omitted for entries without one. Further
//!   lines of multi-line content are indented by two spaces, so every
//!   unindented line starts a new entry.
//!
//! Both renderers are pure: identical history always yields identical output.

use chrono::SecondsFormat;
use serde::Serialize;
use thiserror::Error;

use crate::backend::HistoryEntry;
use crate::codec::Sender;

/// Transcript formats a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
}

impl ExportFormat {
    /// Parse a wire format name. Unsupported names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "json" => Some(ExportFormat::Json),
            "text" => Some(ExportFormat::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Text => "text",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to serialize transcript: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ExportEntry<'a> {
    sender: Sender,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

/// Render `history` in the requested format.
pub fn render(format: ExportFormat, history: &[HistoryEntry]) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => to_json(history),
        ExportFormat::Text => Ok(to_text(history)),
    }
}

pub fn to_json(history: &[HistoryEntry]) -> Result<String, ExportError> {
    let entries: Vec<ExportEntry<'_>> = history
        .iter()
        .map(|entry| ExportEntry {
            sender: entry.sender,
            content: &entry.content,
            timestamp: entry
                .timestamp
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

pub fn to_text(history: &[HistoryEntry]) -> String {
    history
        .iter()
        .map(|entry| {
            let speaker = speaker_label(entry.sender);
            let content = entry.content.lines().collect::<Vec<_>>().join("\n  ");
            match entry.timestamp {
                Some(ts) => format!(
                    "[{}] {}: {}",
                    ts.to_rfc3339_opts(SecondsFormat::Millis, true),
                    speaker,
                    content
                ),
                None => format!("{}: {}", speaker, content),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn speaker_label(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "You",
        Sender::Therapist => "Rebot",
    }
}
