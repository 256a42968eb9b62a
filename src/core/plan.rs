use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanLevel {
    /// Goal decomposition: "log in", "find the report", "export it".
    Strategic,
    /// Concrete UI steps for one strategic goal.
    Tactical,
}

/// An ordered list of steps with a cursor that only moves forward.
/// Replanning replaces the plan; it never rewinds one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub level: PlanLevel,
    pub steps: Vec<String>,
    cursor: usize,
    pub confidence: f64,
    pub estimated_actions: u32,
}

impl Plan {
    pub fn new(goal: &str, level: PlanLevel, steps: Vec<String>, confidence: f64) -> Self {
        let estimated_actions = (steps.len() as u32).max(1) * 2;
        Self {
            goal: goal.to_string(),
            level,
            steps,
            cursor: 0,
            confidence: confidence.clamp(0.0, 1.0),
            estimated_actions,
        }
    }

    /// Degenerate single-step plan used when decomposition fails or the
    /// task is simple enough to attack directly.
    pub fn fallback(goal: &str, level: PlanLevel) -> Self {
        Self::new(goal, level, vec![goal.to_string()], 0.5)
    }

    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.cursor).map(String::as_str)
    }

    /// Advance the cursor. Returns the step that just completed.
    pub fn advance(&mut self) -> Option<String> {
        let done = self.steps.get(self.cursor).cloned();
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
        done
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> &[String] {
        &self.steps[self.cursor.min(self.steps.len())..]
    }

    pub fn completed(&self) -> &[String] {
        &self.steps[..self.cursor.min(self.steps.len())]
    }
}
