//! Experience-based learning. Every executed action becomes an
//! `ActionExperience`; a tabular Q-value per (platform, ui-context,
//! task-pattern) state plus a confidence calibration map bias future
//! decisions, and recurring successes condense into reusable patterns.

pub mod store;

use chrono::{DateTime, Utc};
use colored::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::perception::{ui_context_hash, Element};
use store::{EvolutionStats, PersistedState};

pub use store::EvolutionStore;

const LEARNING_RATE: f64 = 0.1;
const SAVE_EVERY: u64 = 25;

/// Ordered keyword table for coarse task intent. First match wins, so a
/// step like "search for login help" classifies as search, not login.
const TASK_PATTERNS: &[(&str, &[&str])] = &[
    ("search", &["search", "find", "look for", "query"]),
    ("navigate", &["go to", "open", "visit", "navigate"]),
    ("fill_form", &["fill", "enter", "type", "input", "submit"]),
    ("click_action", &["click", "press", "tap", "select"]),
    ("login", &["login", "sign in", "authenticate"]),
    ("upload", &["upload", "attach", "import"]),
    ("download", &["download", "export", "save"]),
    ("scroll", &["scroll", "browse", "see more"]),
    ("read_data", &["read", "get", "extract", "scrape"]),
    ("compose", &["write", "compose", "draft", "reply"]),
];

/// Pure function of the step text.
pub fn detect_task_pattern(task: &str) -> &'static str {
    let lower = task.to_lowercase();
    for (pattern, keywords) in TASK_PATTERNS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return pattern;
        }
    }
    "general"
}

/// One recorded (context, action, outcome) tuple. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExperience {
    pub platform: String,
    pub ui_context_hash: String,
    pub task_pattern: String,
    pub action_kind: String,
    pub action_target: String,
    pub action_params: Value,
    pub success: bool,
    pub latency_secs: f64,
    pub error: String,
    pub reward: f64,
    pub confidence_delta: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Default for ActionExperience {
    fn default() -> Self {
        Self {
            platform: String::new(),
            ui_context_hash: String::new(),
            task_pattern: String::new(),
            action_kind: String::new(),
            action_target: String::new(),
            action_params: Value::Null,
            success: false,
            latency_secs: 0.0,
            error: String::new(),
            reward: 0.0,
            confidence_delta: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// A reusable behavior distilled from repeated successful experiences.
/// Keyed by `platform_taskpattern`, overwritten on re-extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub platform: String,
    pub pattern_type: String,
    pub trigger_conditions: Value,
    pub optimal_action: String,
    pub success_rate: f64,
    pub uses: u64,
    pub avg_time_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseLevel {
    Novice,
    Learning,
    Proficient,
    Expert,
    Master,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformExpertise {
    pub actions: u64,
    pub successes: u64,
    pub level: ExpertiseLevel,
    pub first_seen: DateTime<Utc>,
    pub patterns_learned: u64,
}

impl Default for PlatformExpertise {
    fn default() -> Self {
        Self {
            actions: 0,
            successes: 0,
            level: ExpertiseLevel::Novice,
            first_seen: Utc::now(),
            patterns_learned: 0,
        }
    }
}

impl PlatformExpertise {
    fn reclassify(&mut self) {
        let rate = self.successes as f64 / (self.actions.max(1)) as f64;
        self.level = if self.actions >= 100 && rate >= 0.95 {
            ExpertiseLevel::Master
        } else if self.actions >= 50 && rate >= 0.85 {
            ExpertiseLevel::Expert
        } else if self.actions >= 20 && rate >= 0.7 {
            ExpertiseLevel::Proficient
        } else if self.actions >= 5 {
            ExpertiseLevel::Learning
        } else {
            ExpertiseLevel::Novice
        };
    }
}

pub struct SelfEvolution {
    experiences: Vec<ActionExperience>,
    patterns: HashMap<String, LearnedPattern>,
    q_table: HashMap<String, HashMap<String, f64>>,
    confidence_map: HashMap<String, f64>,
    expertise: HashMap<String, PlatformExpertise>,
    stats: EvolutionStats,
    epsilon: f64,
    store: EvolutionStore,
}

impl SelfEvolution {
    /// Load persisted state from the store; a missing or corrupt file
    /// starts empty and never fails.
    pub fn load(store: EvolutionStore, epsilon: f64) -> Self {
        let state = store.load();
        Self {
            experiences: state.experiences,
            patterns: state.patterns,
            q_table: state.q_table,
            confidence_map: state.confidence_map,
            expertise: state.expertise,
            stats: state.stats,
            epsilon,
            store,
        }
    }

    fn state_key(platform: &str, ui_hash: &str, task_pattern: &str) -> String {
        format!("{}|{}|{}", platform, ui_hash, task_pattern)
    }

    /// Record one executed action and run the learning updates.
    #[allow(clippy::too_many_arguments)]
    pub fn record_experience(
        &mut self,
        platform: &str,
        elements: &[Element],
        task: &str,
        action_kind: &str,
        action_target: &str,
        action_params: Value,
        success: bool,
        latency_secs: f64,
        error: &str,
    ) {
        let reward = if success {
            if latency_secs < 1.0 {
                1.0 + (1.0 - latency_secs) * 0.5
            } else {
                1.0
            }
        } else if !error.is_empty() {
            -1.0
        } else {
            -0.5
        };

        let ui_hash = ui_context_hash(elements);
        let task_pattern = detect_task_pattern(task);
        let state_key = Self::state_key(platform, &ui_hash, task_pattern);

        // One-step Q update; each action is treated as terminal, so there
        // is no discounted future term.
        let q = self
            .q_table
            .entry(state_key)
            .or_default()
            .entry(action_kind.to_string())
            .or_insert(0.0);
        *q += LEARNING_RATE * (reward - *q);
        self.stats.learning_events += 1;

        // Confidence calibration: exponential moving average of the
        // success signal per (platform, action kind).
        let conf_key = format!("{}|{}", platform, action_kind);
        let old_conf = *self.confidence_map.get(&conf_key).unwrap_or(&0.5);
        let signal = if success { 1.0 } else { 0.0 };
        let new_conf = old_conf * 0.9 + signal * 0.1;
        self.confidence_map.insert(conf_key, new_conf);

        let entry = self.expertise.entry(platform.to_string()).or_default();
        entry.actions += 1;
        if success {
            entry.successes += 1;
        }
        entry.reclassify();

        self.experiences.push(ActionExperience {
            platform: platform.to_string(),
            ui_context_hash: ui_hash,
            task_pattern: task_pattern.to_string(),
            action_kind: action_kind.to_string(),
            action_target: action_target.to_string(),
            action_params,
            success,
            latency_secs,
            error: error.to_string(),
            reward,
            confidence_delta: new_conf - old_conf,
            timestamp: Utc::now(),
        });

        self.stats.total_actions += 1;
        if success {
            self.stats.total_successes += 1;
        }

        if self.stats.total_actions % SAVE_EVERY == 0 {
            self.checkpoint();
        }
    }

    /// Epsilon-greedy pick over the available action kinds. Returns the
    /// chosen kind and an expected success probability.
    pub fn best_action(
        &self,
        platform: &str,
        elements: &[Element],
        task: &str,
        available: &[&str],
    ) -> (String, f64) {
        if available.is_empty() {
            return ("click".to_string(), 0.5);
        }

        if self.epsilon > 0.0 && rand::thread_rng().gen::<f64>() < self.epsilon {
            let pick = available[rand::thread_rng().gen_range(0..available.len())];
            return (pick.to_string(), 0.5);
        }

        let ui_hash = ui_context_hash(elements);
        let state_key = Self::state_key(platform, &ui_hash, detect_task_pattern(task));

        if let Some(q_values) = self.q_table.get(&state_key) {
            if let Some((kind, q)) = q_values
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
            {
                // Logistic transform turns the Q-value into a probability.
                let prob = 1.0 / (1.0 + (-q).exp());
                return (kind.clone(), prob);
            }
        }

        // No history for this state: fall back to the calibration map.
        let mut best = (available[0].to_string(), 0.5);
        for kind in available {
            let conf_key = format!("{}|{}", platform, kind);
            let conf = *self.confidence_map.get(&conf_key).unwrap_or(&0.5);
            if conf > best.1 {
                best = (kind.to_string(), conf);
            }
        }
        best
    }

    /// Condense recurring successes into `LearnedPattern`s. For each
    /// (platform, task-pattern) group with at least 3 successful examples,
    /// the dominant action kind (share >= 0.7) becomes the pattern's
    /// recommended action. Returns how many patterns were written.
    pub fn extract_patterns(&mut self) -> usize {
        let mut grouped: HashMap<(String, String), Vec<&ActionExperience>> = HashMap::new();
        for exp in self.experiences.iter().filter(|e| e.success) {
            grouped
                .entry((exp.platform.clone(), exp.task_pattern.clone()))
                .or_default()
                .push(exp);
        }

        let mut found = 0;
        let mut learned_for: Vec<String> = Vec::new();
        for ((platform, task_pattern), exps) in grouped {
            if exps.len() < 3 {
                continue;
            }

            let mut counts: HashMap<&str, usize> = HashMap::new();
            for exp in &exps {
                *counts.entry(exp.action_kind.as_str()).or_default() += 1;
            }
            let Some((kind, count)) = counts.into_iter().max_by_key(|&(_, c)| c) else {
                continue;
            };

            let share = count as f64 / exps.len() as f64;
            if share < 0.7 {
                continue;
            }

            let avg_time = exps.iter().map(|e| e.latency_secs).sum::<f64>() / exps.len() as f64;
            let key = format!("{}_{}", platform, task_pattern);
            self.patterns.insert(
                key,
                LearnedPattern {
                    platform: platform.clone(),
                    pattern_type: task_pattern.clone(),
                    trigger_conditions: serde_json::json!({ "task_pattern": task_pattern }),
                    optimal_action: kind.to_string(),
                    success_rate: share,
                    uses: exps.len() as u64,
                    avg_time_secs: avg_time,
                },
            );
            learned_for.push(platform);
            found += 1;
        }

        for platform in learned_for {
            if let Some(exp) = self.expertise.get_mut(&platform) {
                exp.patterns_learned += 1;
            }
        }

        if found > 0 {
            println!(
                "{} Extracted {} patterns from experience",
                "🧬".magenta(),
                found
            );
            self.checkpoint();
        }
        found
    }

    /// Textual hint injected into the oracle prompt: platform expertise,
    /// any known pattern for this task, overall success rate.
    pub fn context_for_prompt(&self, platform: &str, task: &str) -> String {
        let mut parts = Vec::new();

        if let Some(exp) = self.expertise.get(platform) {
            parts.push(format!(
                "Platform expertise: {:?} ({} actions, {} successes)",
                exp.level, exp.actions, exp.successes
            ));
        }

        let task_pattern = detect_task_pattern(task);
        if let Some(p) = self.patterns.get(&format!("{}_{}", platform, task_pattern)) {
            parts.push(format!(
                "Known pattern '{}': {:.0}% success rate, recommended action: {}",
                task_pattern,
                p.success_rate * 100.0,
                p.optimal_action
            ));
        }

        if self.stats.total_actions > 0 {
            let rate =
                self.stats.total_successes as f64 / self.stats.total_actions as f64 * 100.0;
            parts.push(format!("Overall success rate: {:.1}%", rate));
        }

        parts.join("\n")
    }

    pub fn total_actions(&self) -> u64 {
        self.stats.total_actions
    }

    pub fn stats(&self) -> Value {
        serde_json::json!({
            "total_actions": self.stats.total_actions,
            "total_successes": self.stats.total_successes,
            "success_rate": self.stats.total_successes as f64
                / self.stats.total_actions.max(1) as f64,
            "learning_events": self.stats.learning_events,
            "experiences_stored": self.experiences.len(),
            "patterns_learned": self.patterns.len(),
            "platforms_known": self.expertise.len(),
        })
    }

    /// Persist the current state. Failures are logged, never fatal.
    pub fn checkpoint(&self) {
        let state = PersistedState {
            q_table: self.q_table.clone(),
            confidence_map: self.confidence_map.clone(),
            expertise: self.expertise.clone(),
            patterns: self.patterns.clone(),
            stats: self.stats.clone(),
            experiences: self.experiences.clone(),
        };
        if let Err(e) = self.store.save(&state) {
            eprintln!("{} Failed to persist evolution state: {}", "⚠️".yellow(), e);
        }
    }

    /// Wipe all learned state, in memory and on disk.
    pub fn reset(&mut self) {
        self.experiences.clear();
        self.patterns.clear();
        self.q_table.clear();
        self.confidence_map.clear();
        self.expertise.clear();
        self.stats = EvolutionStats::default();
        self.checkpoint();
    }

    #[cfg(test)]
    pub fn q_value(&self, platform: &str, ui_hash: &str, task_pattern: &str, kind: &str) -> f64 {
        self.q_table
            .get(&Self::state_key(platform, ui_hash, task_pattern))
            .and_then(|m| m.get(kind))
            .copied()
            .unwrap_or(0.0)
    }
}
