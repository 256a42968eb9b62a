//! On-disk form of the learned state. One JSON document with a stable
//! schema so external tooling can inspect what the agent has learned.
//! Writes go through a temp file + rename so a kill mid-write never leaves
//! a corrupt store, and a corrupt or missing file on load never aborts
//! startup.

use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{ActionExperience, LearnedPattern, PlatformExpertise};

pub const EXPERIENCE_PERSIST_CAP: usize = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionStats {
    pub total_actions: u64,
    pub total_successes: u64,
    pub learning_events: u64,
}

/// The full persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub q_table: HashMap<String, HashMap<String, f64>>,
    #[serde(default)]
    pub confidence_map: HashMap<String, f64>,
    #[serde(default)]
    pub expertise: HashMap<String, PlatformExpertise>,
    #[serde(default)]
    pub patterns: HashMap<String, LearnedPattern>,
    #[serde(default)]
    pub stats: EvolutionStats,
    #[serde(default)]
    pub experiences: Vec<ActionExperience>,
}

pub struct EvolutionStore {
    path: PathBuf,
}

impl EvolutionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the user data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("screenpilot")
            .join("evolution.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. A missing or unreadable file yields an
    /// empty state; this must never fail process startup.
    pub fn load(&self) -> PersistedState {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    println!(
                        "{} Loaded evolution state: {} patterns, {} platforms",
                        "🧬".magenta(),
                        state.patterns.len(),
                        state.expertise.len()
                    );
                    state
                }
                Err(e) => {
                    eprintln!(
                        "{} Evolution store at {:?} is corrupt ({}), starting fresh",
                        "⚠️".yellow(),
                        self.path,
                        e
                    );
                    PersistedState::default()
                }
            },
            Err(_) => PersistedState::default(),
        }
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// real path. At most the last 1000 raw experiences are kept.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let mut trimmed = state.clone();
        if trimmed.experiences.len() > EXPERIENCE_PERSIST_CAP {
            let start = trimmed.experiences.len() - EXPERIENCE_PERSIST_CAP;
            trimmed.experiences.drain(..start);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store dir {:?}", parent))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&trimmed)?;
        fs::write(&tmp, body).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move store into place at {:?}", self.path))?;
        Ok(())
    }
}
