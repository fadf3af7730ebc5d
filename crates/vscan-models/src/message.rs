//! Queue message bodies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a queue message cannot become a job.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Message does not contain a source URL")]
    MissingUrl,
}

/// Body of a work request: `{"youtube_url": "...", "phrase": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub youtube_url: String,
    /// Overrides the worker's default phrase when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    youtube_url: Option<String>,
    #[serde(default)]
    phrase: Option<String>,
}

impl QueueMessage {
    pub fn new(youtube_url: impl Into<String>, phrase: Option<String>) -> Self {
        Self {
            youtube_url: youtube_url.into(),
            phrase,
        }
    }

    /// Parse a raw message body. A missing or blank URL is an error; a blank
    /// phrase counts as absent.
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let raw: RawMessage = serde_json::from_str(body)?;
        let youtube_url = raw
            .youtube_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(MessageError::MissingUrl)?;
        let phrase = raw
            .phrase
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Ok(Self { youtube_url, phrase })
    }

    /// Phrase to scan for, falling back to `default`.
    pub fn phrase_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.phrase.as_deref().unwrap_or(default)
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
