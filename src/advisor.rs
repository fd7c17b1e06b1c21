//! The conflict-resolution advisor.
//!
//! The record engine treats the oracle as two stateless text RPCs:
//! `classify` picks a whole-hunk strategy per conflict, `generate` writes
//! merged code for the conflicts no strategy covers. Replay never touches
//! this module.

use serde::{Deserialize, Serialize};

use crate::error::RegraftError;

/// Two stateless RPCs. Implementations must be callable from the per-file
/// resolver fan-out, so the trait is `Sync`.
pub trait Advisor: Sync {
    /// Strategy classification: returns lines of `N STRATEGY`.
    fn classify(&self, prompt: &str) -> Result<String, RegraftError>;

    /// Code generation: returns blocks headed `=== RESOLUTION N ===`.
    fn generate(&self, prompt: &str) -> Result<String, RegraftError>;
}

// ---------------------------------------------------------------------------
// Claude implementation
// ---------------------------------------------------------------------------

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 8192;

const CLASSIFY_SYSTEM: &str = "You resolve merge conflicts. For each numbered conflict, \
answer with exactly one line of the form `N STRATEGY` where STRATEGY is one of \
OURS, THEIRS, BOTH_OT (ours then theirs), BOTH_TO (theirs then ours), or GENERATE. \
No other output.";

const GENERATE_SYSTEM: &str = "You resolve merge conflicts. For each numbered conflict, \
emit a block starting with a line `=== RESOLUTION N ===` followed by only the merged \
code. No code fences, no commentary.";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// Advisor backed by the Anthropic messages API.
///
/// The key is read lazily: constructing without one is fine, and the error
/// only surfaces if a record actually needs the oracle (tiers 0 and reuse
/// resolve most conflicts without it).
pub struct ClaudeAdvisor {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::blocking::Client,
}

impl ClaudeAdvisor {
    pub fn from_env() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            model: DEFAULT_MODEL.to_owned(),
            client: reqwest::blocking::Client::new(),
        }
    }

    #[cfg(test)]
    fn without_key() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_key: None,
            model: DEFAULT_MODEL.to_owned(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn complete(&self, system: &str, prompt: &str) -> Result<String, RegraftError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| RegraftError::Advisor {
            detail: "ANTHROPIC_API_KEY is not set and this record needs the oracle".to_owned(),
        })?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint.trim_end_matches('/')))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .map_err(|e| RegraftError::Advisor {
                detail: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RegraftError::Advisor {
                detail: format!("HTTP {status}: {}", body.chars().take(400).collect::<String>()),
            });
        }

        let parsed: MessagesResponse = response.json().map_err(|e| RegraftError::Advisor {
            detail: format!("malformed response: {e}"),
        })?;

        let text: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(RegraftError::Advisor {
                detail: "response contained no text".to_owned(),
            });
        }
        Ok(text)
    }
}

impl Advisor for ClaudeAdvisor {
    fn classify(&self, prompt: &str) -> Result<String, RegraftError> {
        self.complete(CLASSIFY_SYSTEM, prompt)
    }

    fn generate(&self, prompt: &str) -> Result<String, RegraftError> {
        self.complete(GENERATE_SYSTEM, prompt)
    }
}
