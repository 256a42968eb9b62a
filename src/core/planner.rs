use colored::*;

use crate::core::action::ActionResult;
use crate::core::plan::{Plan, PlanLevel};
use crate::oracle::{DecisionOracle, OracleError};
use crate::perception::{Element, Frame};

/// Tasks phrased as explicit sequences are split on these markers before
/// any oracle round trip.
const SEQUENCE_MARKERS: &[&str] = &[" and then ", " after that ", " afterwards ", " then ", " next "];

/// Verbs that mark a task simple enough to attack without decomposition.
const SIMPLE_VERBS: &[&str] = &[
    "click", "tap", "type", "press", "scroll", "open", "launch", "close", "go to", "navigate",
];

const MIN_TACTICAL_STEPS: usize = 3;
const MAX_TACTICAL_STEPS: usize = 7;
const MAX_STRATEGIC_GOALS: usize = 7;
const STUCK_RUN: usize = 5;

pub struct PlanningEngine;

impl PlanningEngine {
    /// Split a sequenced task into ordered goals, or `None` when the task
    /// has no sequencing markers. Purely lexical, never calls out.
    pub fn split_sequenced(task: &str) -> Option<Vec<String>> {
        let mut goals = Vec::new();
        let mut rest = task;
        loop {
            match Self::find_marker(rest) {
                Some((idx, len)) => {
                    let head = rest[..idx].trim();
                    if !head.is_empty() {
                        goals.push(head.to_string());
                    }
                    rest = &rest[idx + len..];
                }
                None => {
                    let tail = rest.trim();
                    if !tail.is_empty() {
                        goals.push(tail.to_string());
                    }
                    break;
                }
            }
        }
        if goals.len() >= 2 {
            Some(goals)
        } else {
            None
        }
    }

    /// Earliest sequencing marker, matched ASCII-case-insensitively at the
    /// original byte offsets. The markers are pure ASCII, so the matched
    /// span always ends at a char boundary even in non-ASCII tasks.
    fn find_marker(text: &str) -> Option<(usize, usize)> {
        let bytes = text.as_bytes();
        for (i, _) in text.char_indices() {
            for marker in SEQUENCE_MARKERS {
                let m = marker.as_bytes();
                if bytes.len() - i >= m.len() && bytes[i..i + m.len()].eq_ignore_ascii_case(m) {
                    return Some((i, m.len()));
                }
            }
        }
        None
    }

    /// A task is simple when it is one short imperative with a mechanical
    /// verb. Simple tasks skip decomposition entirely.
    pub fn is_simple(task: &str) -> bool {
        let lower = task.trim().to_lowercase();
        if lower.split_whitespace().count() > 8 {
            return false;
        }
        if lower.contains(" and ") || SEQUENCE_MARKERS.iter().any(|m| lower.contains(m)) {
            return false;
        }
        SIMPLE_VERBS.iter().any(|v| lower.starts_with(v))
    }

    /// Decompose a task into strategic goals. Deterministic paths first:
    /// sequenced tasks split lexically, simple tasks become a single goal.
    /// Only the remainder pays for an oracle call, and any oracle trouble
    /// degrades to a single-goal fallback.
    pub async fn strategic(
        oracle: &dyn DecisionOracle,
        frame: &Frame,
        task: &str,
        learned_hint: &str,
    ) -> Plan {
        if let Some(goals) = Self::split_sequenced(task) {
            println!(
                "{}",
                format!("📋 Sequenced task, {} goals, no planning call", goals.len()).cyan()
            );
            return Plan::new(task, PlanLevel::Strategic, goals, 0.9);
        }
        if Self::is_simple(task) {
            println!("{}", "⚡ FAST MODE: simple task, single goal".cyan());
            return Plan::new(task, PlanLevel::Strategic, vec![task.to_string()], 0.85);
        }

        let prompt = format!(
            r#"Decompose this desktop task into 2-{} ordered high-level goals.
Each goal should be independently verifiable on screen.

TASK: {}
{}
RESPOND WITH JSON ONLY:
{{ "goals": ["...", "..."], "confidence": 0.0-1.0 }}"#,
            MAX_STRATEGIC_GOALS,
            task,
            if learned_hint.is_empty() {
                String::new()
            } else {
                format!("\nLEARNED CONTEXT:\n{}\n", learned_hint)
            }
        );

        match oracle.query(frame, &prompt).await {
            Ok(value) => {
                let goals: Vec<String> = value["goals"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|g| g.as_str())
                            .map(|g| g.trim().to_string())
                            .filter(|g| !g.is_empty())
                            .take(MAX_STRATEGIC_GOALS)
                            .collect()
                    })
                    .unwrap_or_default();
                let confidence = value["confidence"].as_f64().unwrap_or(0.7);
                if goals.is_empty() {
                    println!("{}", "⚠️ Planner returned no goals, using task as-is".yellow());
                    Plan::fallback(task, PlanLevel::Strategic)
                } else {
                    Plan::new(task, PlanLevel::Strategic, goals, confidence)
                }
            }
            Err(e) => {
                eprintln!("{}", format!("⚠️ Strategic planning failed: {}", e).yellow());
                Plan::fallback(task, PlanLevel::Strategic)
            }
        }
    }

    /// Expand one strategic goal into concrete UI steps against the current
    /// screen. Simple goals stay a single step without an oracle call.
    pub async fn tactical(
        oracle: &dyn DecisionOracle,
        frame: &Frame,
        goal: &str,
        elements: &[Element],
    ) -> Plan {
        if Self::is_simple(goal) {
            return Plan::new(goal, PlanLevel::Tactical, vec![goal.to_string()], 0.85);
        }

        let mut visible = String::new();
        for e in elements.iter().take(15) {
            visible.push_str(&format!("  - {} \"{}\"\n", e.kind, e.text));
        }

        let prompt = format!(
            r#"Break this goal into {}-{} concrete UI steps for the screen you see.
Each step is one physical interaction (click X, type Y, press Z).

GOAL: {}

VISIBLE ELEMENTS:
{}
RESPOND WITH JSON ONLY:
{{ "steps": ["...", "..."], "confidence": 0.0-1.0 }}"#,
            MIN_TACTICAL_STEPS, MAX_TACTICAL_STEPS, goal, visible
        );

        match oracle.query(frame, &prompt).await {
            Ok(value) => {
                let steps: Vec<String> = value["steps"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|s| s.as_str())
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .take(MAX_TACTICAL_STEPS)
                            .collect()
                    })
                    .unwrap_or_default();
                let confidence = value["confidence"].as_f64().unwrap_or(0.7);
                if steps.is_empty() {
                    Plan::fallback(goal, PlanLevel::Tactical)
                } else {
                    Plan::new(goal, PlanLevel::Tactical, steps, confidence)
                }
            }
            Err(e) => {
                eprintln!("{}", format!("⚠️ Tactical planning failed: {}", e).yellow());
                Plan::fallback(goal, PlanLevel::Tactical)
            }
        }
    }

    /// Cheap stuck check that needs no oracle: five consecutive actions of
    /// the same kind reads as thrashing.
    pub fn heuristic_stuck(history: &[ActionResult]) -> Option<String> {
        if history.len() < STUCK_RUN {
            return None;
        }
        let tail = &history[history.len() - STUCK_RUN..];
        let kind = &tail[0].kind;
        if tail.iter().all(|r| &r.kind == kind) {
            Some(format!(
                "{} consecutive {} actions without completing the step",
                STUCK_RUN, kind
            ))
        } else {
            None
        }
    }

    /// Ask the oracle what went wrong and how to adjust. Used before a
    /// replan; failure collapses to a generic adjustment.
    pub async fn reflect(
        oracle: &dyn DecisionOracle,
        frame: &Frame,
        goal: &str,
        history: &[ActionResult],
    ) -> Result<String, OracleError> {
        let lines: Vec<String> = history
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|r| {
                if r.success {
                    r.summary.clone()
                } else {
                    format!("{} FAILED: {}", r.summary, r.error.as_deref().unwrap_or("?"))
                }
            })
            .collect();

        let prompt = format!(
            r#"The agent has not completed this goal despite the actions below.

GOAL: {}

ACTIONS SO FAR:
{}

Diagnose what is going wrong and state a different approach in one sentence.
RESPOND WITH JSON ONLY:
{{ "assessment": "...", "adjustment": "..." }}"#,
            goal,
            lines
                .iter()
                .enumerate()
                .map(|(i, h)| format!("  {}. {}", i + 1, h))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let value = oracle.query(frame, &prompt).await?;
        Ok(value["adjustment"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("try a different interaction path toward the same goal")
            .to_string())
    }
}
