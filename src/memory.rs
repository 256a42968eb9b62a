//! Working memory: scratch space that lives for exactly one task. Holds
//! data extracted along the way, a labelled clipboard for moving values
//! between steps, and the workflow progress ledger.

use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One piece of data pulled off the screen during a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub source: String,
    pub kind: String,
    pub data: Value,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Progress ledger for the current task's steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub goal: String,
    pub completed_steps: Vec<String>,
    pub remaining_steps: Vec<String>,
    pub current_step: Option<String>,
    pub successes: Vec<StepRecord>,
    pub failures: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(goal: &str, steps: Vec<String>) -> Self {
        Self {
            goal: goal.to_string(),
            remaining_steps: steps,
            ..Default::default()
        }
    }

    pub fn begin_step(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
        self.remaining_steps.retain(|s| s != step);
    }

    pub fn mark_success(&mut self, step: &str, detail: impl Into<String>) {
        self.successes.push(StepRecord {
            step: step.to_string(),
            detail: detail.into(),
            timestamp: Utc::now(),
        });
        self.completed_steps.push(step.to_string());
    }

    pub fn mark_failure(&mut self, step: &str, error: impl Into<String>) {
        self.failures.push(StepRecord {
            step: step.to_string(),
            detail: error.into(),
            timestamp: Utc::now(),
        });
    }

    /// Fraction of known steps completed, in [0, 1].
    pub fn progress(&self) -> f64 {
        let total = self.completed_steps.len() + self.remaining_steps.len();
        if total == 0 {
            return 0.0;
        }
        self.completed_steps.len() as f64 / total as f64
    }
}

#[derive(Default)]
pub struct WorkingMemory {
    extractions: Vec<Extraction>,
    clipboard: HashMap<String, Value>,
    pub workflow: WorkflowState,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset everything for a new task.
    pub fn start_task(&mut self, goal: &str, steps: Vec<String>) {
        self.extractions.clear();
        self.clipboard.clear();
        self.workflow = WorkflowState::new(goal, steps);
    }

    pub fn extract(&mut self, source: &str, kind: &str, data: Value, confidence: f64) {
        println!(
            "{} Extracted {} from {}: {:.80}",
            "📊".cyan(),
            kind,
            source,
            data.to_string()
        );
        self.extractions.push(Extraction {
            source: source.to_string(),
            kind: kind.to_string(),
            data,
            confidence,
            timestamp: Utc::now(),
        });
    }

    pub fn extractions(&self, kind: Option<&str>) -> Vec<&Extraction> {
        match kind {
            Some(k) => self.extractions.iter().filter(|e| e.kind == k).collect(),
            None => self.extractions.iter().collect(),
        }
    }

    pub fn copy(&mut self, key: &str, data: Value) {
        self.clipboard.insert(key.to_string(), data);
    }

    pub fn paste(&self, key: &str) -> Option<&Value> {
        self.clipboard.get(key)
    }

    /// Snapshot for the task result, so callers can inspect what the agent
    /// picked up along the way.
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "extractions": self.extractions,
            "clipboard": self.clipboard,
            "workflow": {
                "goal": self.workflow.goal,
                "progress": self.workflow.progress(),
                "completed": self.workflow.completed_steps.len(),
                "remaining": self.workflow.remaining_steps.len(),
                "failures": self.workflow.failures.len(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extractions_cleared_on_new_task() {
        let mut m = WorkingMemory::new();
        m.extract("news.ycombinator.com", "headlines", json!(["a", "b"]), 0.9);
        assert_eq!(m.extractions(None).len(), 1);
        m.start_task("next task", vec!["step".into()]);
        assert_eq!(m.extractions(None).len(), 0);
    }

    #[test]
    fn test_extraction_filter_by_kind() {
        let mut m = WorkingMemory::new();
        m.extract("gmail", "email", json!("a@b.c"), 1.0);
        m.extract("gmail", "subject", json!("hello"), 1.0);
        assert_eq!(m.extractions(Some("email")).len(), 1);
    }

    #[test]
    fn test_clipboard_roundtrip() {
        let mut m = WorkingMemory::new();
        m.copy("subject", json!("quarterly report"));
        assert_eq!(m.paste("subject"), Some(&json!("quarterly report")));
        assert_eq!(m.paste("missing"), None);
    }

    #[test]
    fn test_workflow_progress() {
        let mut w = WorkflowState::new("demo", vec!["a".into(), "b".into()]);
        assert_eq!(w.progress(), 0.0);
        w.begin_step("a");
        w.mark_success("a", "ok");
        assert_eq!(w.progress(), 0.5);
        w.begin_step("b");
        w.mark_failure("b", "timed out");
        assert_eq!(w.completed_steps.len(), 1);
        assert_eq!(w.failures.len(), 1);
    }
}
