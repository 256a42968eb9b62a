use anyhow::{Context, Result};
use colored::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::action::{Action, Decision, ScrollDirection};
use crate::perception::Element;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfig {
    pub primary_model: String,
    pub fallback_model: String,
    /// Hard cap on actions within a single step.
    #[serde(default = "default_max_sub_iterations")]
    pub max_sub_iterations: u32,
    /// Hard cap on actions across a whole task.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Strategic replans allowed before the task is declared failed.
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// Skip the second completion check when the deciding call was already
    /// this confident.
    #[serde(default = "default_verify_skip_confidence")]
    pub verify_skip_confidence: f64,
    /// Completion verdicts at or above this confidence are accepted outright.
    #[serde(default = "default_done_accept_confidence")]
    pub done_accept_confidence: f64,
    /// Verdicts at or above this confidence are accepted when the reasoning
    /// also carries a success keyword.
    #[serde(default = "default_done_keyword_confidence")]
    pub done_keyword_confidence: f64,
    /// Exploration rate for learned action selection. Zero disables it.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Override for the learned-state file. Defaults to the platform data dir.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_max_sub_iterations() -> u32 {
    25
}
fn default_max_iterations() -> u32 {
    100
}
fn default_max_replans() -> u32 {
    2
}
fn default_verify_skip_confidence() -> f64 {
    0.9
}
fn default_done_accept_confidence() -> f64 {
    0.8
}
fn default_done_keyword_confidence() -> f64 {
    0.7
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_task_timeout() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            primary_model: "gemini-3-flash-preview".to_string(),
            fallback_model: "gemini-2.5-flash".to_string(),
            max_sub_iterations: default_max_sub_iterations(),
            max_iterations: default_max_iterations(),
            max_replans: default_max_replans(),
            verify_skip_confidence: default_verify_skip_confidence(),
            done_accept_confidence: default_done_accept_confidence(),
            done_keyword_confidence: default_done_keyword_confidence(),
            epsilon: default_epsilon(),
            task_timeout_secs: default_task_timeout(),
            store_path: None,
        }
    }
}

impl AgentConfig {
    /// Load `screenpilot.toml` from the working directory, falling back to
    /// defaults when absent. A present-but-broken file is an error.
    pub fn load() -> Result<Self> {
        let path = PathBuf::from("screenpilot.toml");
        if !path.exists() {
            println!("{}", "⚙️  No screenpilot.toml found, using defaults".dimmed());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Cooperative cancellation, polled at the top of every loop iteration and
/// between oracle retry attempts.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Oracle-free shortcut for trivially mechanical steps. Each rule is a
/// pattern plus an action builder; the table is consulted in order and the
/// first match wins. Steps carrying any hedge word always go to the oracle.
pub struct FastPathRules {
    hedges: Vec<&'static str>,
    press_enter: Regex,
    press_escape: Regex,
    type_text: Regex,
    scroll: Regex,
    navigate: Regex,
    click: Regex,
    open_app: Regex,
}

impl Default for FastPathRules {
    fn default() -> Self {
        Self {
            hedges: vec![
                "if ", "verify", "check", "confirm", "find", "look for", "make sure", "?",
            ],
            press_enter: Regex::new(r"^(?:press|hit)\s+enter\b").unwrap(),
            press_escape: Regex::new(r"^(?:press|hit)\s+escape\b").unwrap(),
            type_text: Regex::new(r#"(?i)^(?:type|enter|input)\s+"([^"]+)"(?:\s+(?:into|in)\b.*)?$"#)
                .unwrap(),
            scroll: Regex::new(r"^scroll\s+(down|up)\b").unwrap(),
            navigate: Regex::new(r"^(?:go to|navigate to|open)\s+(https?://\S+|\S+\.(?:com|org|net|io|dev)\S*)").unwrap(),
            click: Regex::new(r"^(?:click|tap|press)\s+(?:on\s+)?(?:the\s+)?(.+?)(?:\s+button| link)?$").unwrap(),
            open_app: Regex::new(r"^(?:open|launch|start)\s+(?:the\s+)?(\w[\w .-]{0,30})$").unwrap(),
        }
    }
}

impl FastPathRules {
    /// Try to resolve a step without an oracle round trip. Returns `None`
    /// whenever the step needs judgement.
    pub fn match_step(&self, step: &str, elements: &[Element]) -> Option<Decision> {
        let raw = step.trim();
        let step = raw.to_lowercase();
        if self.hedges.iter().any(|h| step.contains(h)) {
            return None;
        }

        if self.press_enter.is_match(&step) {
            return Some(Decision::new(
                Action::Hotkey { keys: vec!["enter".to_string()] },
                "mechanical step: press enter",
            ).with_confidence(0.95));
        }
        if self.press_escape.is_match(&step) {
            return Some(Decision::new(
                Action::Hotkey { keys: vec!["escape".to_string()] },
                "mechanical step: press escape",
            ).with_confidence(0.95));
        }
        // Quoted text keeps its case; the rule runs on the raw step.
        if let Some(caps) = self.type_text.captures(raw) {
            return Some(Decision::new(
                Action::Type { text: caps[1].to_string() },
                "mechanical step: type quoted text",
            ).with_confidence(0.9));
        }
        if let Some(caps) = self.scroll.captures(&step) {
            let direction = if &caps[1] == "up" {
                ScrollDirection::Up
            } else {
                ScrollDirection::Down
            };
            return Some(Decision::new(
                Action::Scroll { direction, amount: 3 },
                "mechanical step: scroll",
            ).with_confidence(0.9));
        }
        if let Some(caps) = self.navigate.captures(&step) {
            let raw = caps[1].to_string();
            let url = if raw.starts_with("http") {
                raw
            } else {
                format!("https://{}", raw)
            };
            return Some(Decision::new(
                Action::Navigate { url },
                "mechanical step: navigate",
            ).with_confidence(0.9));
        }
        if let Some(caps) = self.click.captures(&step) {
            let target = caps[1].trim();
            // Exact text match first, then substring, interactable only.
            let exact = elements.iter().find(|e| {
                e.interactable && e.text.to_lowercase() == target
            });
            let fuzzy = || {
                elements.iter().find(|e| {
                    e.interactable && !e.text.is_empty()
                        && e.text.to_lowercase().contains(target)
                })
            };
            if let Some((element, confidence)) =
                exact.map(|e| (e, 0.9)).or_else(|| fuzzy().map(|e| (e, 0.75)))
            {
                let (x, y) = element.center();
                return Some(
                    Decision::new(
                        Action::Click { x, y },
                        format!("fast path: click \"{}\"", element.text),
                    )
                    .with_confidence(confidence),
                );
            }
            return None;
        }
        if let Some(caps) = self.open_app.captures(&step) {
            let name = caps[1].trim().to_string();
            if name.split_whitespace().count() <= 2 {
                return Some(Decision::new(
                    Action::OpenApp { name },
                    "mechanical step: open application",
                ).with_confidence(0.85));
            }
        }
        None
    }
}
