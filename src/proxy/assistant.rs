//! Chatbot backend proxy
//!
//! Candidates are tried in order. A network failure or a non-JSON body
//! counts as a failed attempt and moves on to the next candidate; the first
//! JSON answer is relayed with its status, whatever that status is.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const UNAVAILABLE_REPLY: &str =
    "Assistant is unavailable. Start the chatbot backend and make sure its configuration is complete.";

/// One failed candidate
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Attempt {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    /// A candidate answered with JSON
    Relayed { status: u16, body: Value },
    /// Every candidate failed
    Unavailable { attempts: Vec<Attempt> },
}

impl AssistantReply {
    pub fn status(&self) -> u16 {
        match self {
            Self::Relayed { status, .. } => *status,
            Self::Unavailable { .. } => 503,
        }
    }

    pub fn into_body(self) -> Value {
        match self {
            Self::Relayed { body, .. } => body,
            Self::Unavailable { attempts } => json!({
                "success": false,
                "reply": UNAVAILABLE_REPLY,
                "attempts": attempts,
            }),
        }
    }
}

/// Trimmed, de-duplicated base URLs without trailing slashes
pub fn normalize_candidates(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for candidate in raw {
        let base = candidate.trim().trim_end_matches('/');
        if base.is_empty() || out.iter().any(|c| c == base) {
            continue;
        }
        out.push(base.to_string());
    }
    out
}

pub struct AssistantProxy {
    candidates: Vec<String>,
    client: reqwest::Client,
}

impl AssistantProxy {
    pub fn new(candidates: &[String], timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("carecircle/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            candidates: normalize_candidates(candidates),
            client,
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    async fn try_candidate(&self, url: &str, payload: &Value) -> Result<(u16, Value), String> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_str::<Value>(&text)
            .map_err(|_| format!("Non-JSON response (status {})", status))?;
        Ok((status, body))
    }

    /// Forward a chat payload to the first candidate that answers with JSON
    pub async fn forward(&self, payload: &Value) -> AssistantReply {
        let mut attempts = Vec::new();

        for base in &self.candidates {
            let url = format!("{}/api/chat", base);
            match self.try_candidate(&url, payload).await {
                Ok((status, body)) => {
                    debug!(url = %url, status, "Assistant answered");
                    return AssistantReply::Relayed { status, body };
                }
                Err(error) => {
                    warn!(url = %url, "Assistant candidate failed: {}", error);
                    attempts.push(Attempt { url, error });
                }
            }
        }

        AssistantReply::Unavailable { attempts }
    }
}
