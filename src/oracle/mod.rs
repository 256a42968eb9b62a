//! Decision oracle seam: the external vision-language service that proposes
//! the next action given a frame and context. The loop only depends on the
//! trait; the error taxonomy is explicit so rate limits, outages and garbage
//! responses get different backoff treatment.

pub mod gemini;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::core::action::Decision;
use crate::core::state::CancelFlag;
use crate::perception::{Element, Frame};

#[derive(Debug, Clone)]
pub enum OracleError {
    /// HTTP 429 or quota exhaustion: back off exponentially.
    RateLimited,
    /// Transport failure or 5xx: worth a short retry.
    Unavailable(String),
    /// The service answered but the payload did not decode. Carries the raw
    /// payload for the log; never retried.
    Malformed(String),
    /// Cooperative cancellation observed between attempts.
    Cancelled,
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::RateLimited => write!(f, "oracle rate limited"),
            OracleError::Unavailable(e) => write!(f, "oracle unavailable: {}", e),
            OracleError::Malformed(raw) => {
                write!(f, "oracle response malformed: {:.200}", raw)
            }
            OracleError::Cancelled => write!(f, "cancelled while waiting on oracle"),
        }
    }
}

impl std::error::Error for OracleError {}

/// Everything the oracle gets to see besides the frame itself.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub task: String,
    pub step: String,
    pub history: Vec<String>,
    pub repetition_warning: Option<String>,
    pub elements: Vec<Element>,
    pub learned_hint: String,
}

impl PromptContext {
    /// Render the decide prompt. The oracle must answer with one JSON
    /// action object; both the compact and verbose key schemes are accepted
    /// on the way back in.
    pub fn render_decide(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("OVERALL TASK: {}\n", self.task));
        out.push_str(&format!("CURRENT STEP: {}\n", self.step));

        if !self.history.is_empty() {
            out.push_str("\nRECENT ACTIONS:\n");
            for (i, h) in self.history.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, h));
            }
        }
        if let Some(warning) = &self.repetition_warning {
            out.push_str(&format!("\n⚠️ {}\n", warning));
        }
        if !self.elements.is_empty() {
            out.push_str("\nDETECTED ELEMENTS:\n");
            for e in self.elements.iter().take(20) {
                out.push_str(&format!(
                    "  - {} \"{}\" at ({},{})\n",
                    e.kind,
                    e.text,
                    e.center().0,
                    e.center().1
                ));
            }
        }
        if !self.learned_hint.is_empty() {
            out.push_str(&format!("\nLEARNED CONTEXT:\n{}\n", self.learned_hint));
        }

        out.push_str(
            r#"
Decide the single next action toward the current step.

RESPOND WITH JSON ONLY:
{
    "action": { "type": "click|type|hotkey|scroll|navigate|wait|open_app|done", ..., "reason": "why" },
    "confidence": 0.0-1.0,
    "observation": "what you see"
}
Use "done" only when the step is visibly complete."#,
        );
        out
    }
}

/// The external decision service.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Propose the next action for the current step.
    async fn decide(&self, frame: &Frame, context: &PromptContext)
        -> Result<Decision, OracleError>;

    /// Free-form structured query (planning, verification, reflection).
    /// The reply is whatever JSON object the service produced.
    async fn query(&self, frame: &Frame, prompt: &str) -> Result<Value, OracleError>;
}

/// Bounded retry with error-kind-aware backoff. Malformed responses are
/// surfaced immediately; cancellation is checked between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, cancel: &CancelFlag, mut call: F) -> Result<T, OracleError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, OracleError>>,
    {
        let mut last = OracleError::Unavailable("no attempts made".to_string());
        for attempt in 0..self.max_attempts {
            if cancel.is_cancelled() {
                return Err(OracleError::Cancelled);
            }
            match call().await {
                Ok(value) => return Ok(value),
                Err(OracleError::Malformed(raw)) => return Err(OracleError::Malformed(raw)),
                Err(OracleError::Cancelled) => return Err(OracleError::Cancelled),
                Err(e) => {
                    let backoff = match &e {
                        // Rate limits double per attempt on top of a 2s floor.
                        OracleError::RateLimited => {
                            Duration::from_secs(2) * 2u32.pow(attempt)
                        }
                        _ => self.base_backoff * (attempt + 1),
                    };
                    last = e;
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(last)
    }
}

/// Pull the first JSON object out of a model reply: fenced ```json blocks
/// first, then the raw body if it already looks like JSON.
pub fn extract_json(text: &str) -> Option<Value> {
    let mut search = text;
    while let Some(start) = search.find("```json") {
        let after = &search[start + 7..];
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(v);
            }
            search = &after[end + 3..];
        } else {
            break;
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
            return Some(v);
        }
    }
    None
}
