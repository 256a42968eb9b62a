use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Scroll direction for `Action::Scroll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrollDirection::Up => write!(f, "up"),
            ScrollDirection::Down => write!(f, "down"),
        }
    }
}

/// A single concrete screen action. One variant per kind, only the fields
/// that kind needs. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { x: i32, y: i32 },
    Type { text: String },
    Hotkey { keys: Vec<String> },
    Scroll { direction: ScrollDirection, amount: i32 },
    Navigate { url: String },
    Wait { seconds: f64 },
    OpenApp { name: String },
    Done,
}

impl Action {
    /// Stable kind string, used as the Q-table action key and for wait
    /// baselines.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Hotkey { .. } => "hotkey",
            Action::Scroll { .. } => "scroll",
            Action::Navigate { .. } => "navigate",
            Action::Wait { .. } => "wait",
            Action::OpenApp { .. } => "open_app",
            Action::Done => "done",
        }
    }

    /// Short fingerprint of kind + arguments for loop detection.
    pub fn signature(&self) -> String {
        let params = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(params.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}:{}", self.kind(), &digest[..8])
    }

    /// Parameter bag for the experience log.
    pub fn params(&self) -> Value {
        match self {
            Action::Click { x, y } => json!({ "x": x, "y": y }),
            Action::Type { text } => json!({ "text": text }),
            Action::Hotkey { keys } => json!({ "keys": keys }),
            Action::Scroll { direction, amount } => {
                json!({ "direction": direction.to_string(), "amount": amount })
            }
            Action::Navigate { url } => json!({ "url": url }),
            Action::Wait { seconds } => json!({ "seconds": seconds }),
            Action::OpenApp { name } => json!({ "name": name }),
            Action::Done => json!({}),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Click { x, y } => write!(f, "click({}, {})", x, y),
            Action::Type { text } => write!(f, "type({:.40})", text),
            Action::Hotkey { keys } => write!(f, "hotkey({})", keys.join("+")),
            Action::Scroll { direction, amount } => write!(f, "scroll({}, {})", direction, amount),
            Action::Navigate { url } => write!(f, "navigate({})", url),
            Action::Wait { seconds } => write!(f, "wait({}s)", seconds),
            Action::OpenApp { name } => write!(f, "open_app({})", name),
            Action::Done => write!(f, "done"),
        }
    }
}

/// An action plus the oracle's stated reason and confidence.
/// Every action that reaches the actuator travels inside one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub confidence: Option<f64>,
    /// Free-text note about what the oracle saw, kept for cross-step
    /// data extraction.
    #[serde(default)]
    pub observation: Option<String>,
}

impl Decision {
    pub fn new(action: Action, reason: impl Into<String>) -> Self {
        Self { action, reason: reason.into(), confidence: None, observation: None }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = Some(observation.into());
        self
    }
}

/// Outcome of one executed action. Produced once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub kind: String,
    pub summary: String,
    pub success: bool,
    pub error: Option<String>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl ActionResult {
    pub fn ok(action: &Action, duration: Duration) -> Self {
        Self {
            kind: action.kind().to_string(),
            summary: action.to_string(),
            success: true,
            error: None,
            duration,
        }
    }

    pub fn failed(action: &Action, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            kind: action.kind().to_string(),
            summary: action.to_string(),
            success: false,
            error: Some(error.into()),
            duration,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Decode failure for an oracle response. Typed so the loop can treat a
/// malformed reply differently from a transport error.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    MissingAction,
    UnknownKind(String),
    BadField(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingAction => write!(f, "response carries no action object"),
            DecodeError::UnknownKind(k) => write!(f, "unknown action kind '{}'", k),
            DecodeError::BadField(name) => write!(f, "missing or invalid field '{}'", name),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Normalize the oracle's two JSON key schemes into one `Decision`.
///
/// The oracle replies either verbose (`{"action": {"type": "click", ...},
/// "confidence": 0.8, "observation": "..."}`) or compact (`{"a": {"t":
/// "click", ...}, "c": 0.8, "o": "..."}`). Both land here.
pub fn decode_decision(value: &Value) -> Result<Decision, DecodeError> {
    let body = value
        .get("a")
        .or_else(|| value.get("action"))
        .ok_or(DecodeError::MissingAction)?;

    let kind = body
        .get("t")
        .or_else(|| body.get("type"))
        .and_then(Value::as_str)
        .ok_or(DecodeError::BadField("type"))?
        .to_ascii_lowercase();

    let get_i32 = |field: &'static str| -> Result<i32, DecodeError> {
        body.get(field)
            .and_then(Value::as_i64)
            .map(|v| v as i32)
            .ok_or(DecodeError::BadField(field))
    };
    let get_str = |field: &'static str| -> Result<String, DecodeError> {
        body.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(DecodeError::BadField(field))
    };

    let action = match kind.as_str() {
        "click" => Action::Click { x: get_i32("x")?, y: get_i32("y")? },
        "type" => Action::Type { text: get_str("text")? },
        "hotkey" => {
            let keys = body
                .get("keys")
                .and_then(Value::as_array)
                .ok_or(DecodeError::BadField("keys"))?
                .iter()
                .filter_map(Value::as_str)
                .map(|k| k.to_ascii_lowercase())
                .collect::<Vec<_>>();
            if keys.is_empty() {
                return Err(DecodeError::BadField("keys"));
            }
            Action::Hotkey { keys }
        }
        "scroll" => {
            let direction = match body
                .get("direction")
                .and_then(Value::as_str)
                .unwrap_or("down")
            {
                "up" => ScrollDirection::Up,
                _ => ScrollDirection::Down,
            };
            let amount = body
                .get("amt")
                .or_else(|| body.get("amount"))
                .and_then(Value::as_i64)
                .unwrap_or(3) as i32;
            Action::Scroll { direction, amount }
        }
        "navigate" => Action::Navigate { url: get_str("url")? },
        "wait" => {
            let seconds = body
                .get("seconds")
                .or_else(|| body.get("amt"))
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            Action::Wait { seconds }
        }
        "open_app" => Action::OpenApp {
            name: body
                .get("name")
                .or_else(|| body.get("app"))
                .and_then(Value::as_str)
                .ok_or(DecodeError::BadField("name"))?
                .to_string(),
        },
        "done" => Action::Done,
        other => return Err(DecodeError::UnknownKind(other.to_string())),
    };

    let reason = body
        .get("r")
        .or_else(|| body.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let confidence = value
        .get("c")
        .or_else(|| value.get("confidence"))
        .and_then(Value::as_f64);

    let observation = value
        .get("o")
        .or_else(|| value.get("observation"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let mut decision = Decision::new(action, reason);
    if let Some(c) = confidence {
        decision = decision.with_confidence(c);
    }
    if !observation.is_empty() {
        decision = decision.with_observation(observation);
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_verbose_click() {
        let v = serde_json::json!({
            "action": { "type": "click", "x": 120, "y": 400, "reason": "hit the button" },
            "confidence": 0.85,
            "observation": "button visible"
        });
        let d = decode_decision(&v).unwrap();
        assert_eq!(d.action, Action::Click { x: 120, y: 400 });
        assert_eq!(d.reason, "hit the button");
        assert_eq!(d.confidence, Some(0.85));
        assert_eq!(d.observation.as_deref(), Some("button visible"));
    }

    #[test]
    fn test_decode_compact_navigate() {
        let v = serde_json::json!({
            "a": { "t": "navigate", "url": "example.com", "r": "go there" },
            "c": 0.9
        });
        let d = decode_decision(&v).unwrap();
        assert_eq!(d.action, Action::Navigate { url: "example.com".into() });
        assert_eq!(d.confidence, Some(0.9));
    }

    #[test]
    fn test_decode_missing_action_is_typed_error() {
        let v = serde_json::json!({ "thinking": "hmm" });
        assert_eq!(decode_decision(&v).unwrap_err(), DecodeError::MissingAction);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let v = serde_json::json!({ "a": { "t": "teleport" } });
        match decode_decision(&v).unwrap_err() {
            DecodeError::UnknownKind(k) => assert_eq!(k, "teleport"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_signature_stable_for_same_args() {
        let a = Action::Click { x: 10, y: 10 };
        let b = Action::Click { x: 10, y: 10 };
        let c = Action::Click { x: 10, y: 11 };
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert!(a.signature().starts_with("click:"));
    }

    #[test]
    fn test_confidence_clamped() {
        let d = Decision::new(Action::Done, "finished").with_confidence(1.7);
        assert_eq!(d.confidence, Some(1.0));
    }
}
