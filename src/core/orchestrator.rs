use anyhow::Result;
use colored::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actuator::ActuatorProvider;
use crate::core::r#loop::{ControlLoop, StepOutcome};
use crate::core::planner::PlanningEngine;
use crate::core::state::{AgentConfig, CancelFlag};
use crate::evolution::{EvolutionStore, SelfEvolution};
use crate::oracle::DecisionOracle;
use crate::perception::PerceptionProvider;

/// Learned patterns are distilled after this many new experiences.
const PATTERN_EXTRACT_EVERY: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Everything a caller learns about a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub task: String,
    pub actions_taken: u32,
    pub duration_seconds: f64,
    pub error: Option<String>,
    pub extracted_data: Value,
    pub final_state: TaskState,
    pub self_heals: u32,
    pub reflections: u32,
    pub replans: u32,
}

/// Owns the control loop and drives it goal by goal: strategic plan,
/// tactical plan per goal, bounded replans when a step stalls.
pub struct Orchestrator {
    control: ControlLoop,
    config: AgentConfig,
    cancel: CancelFlag,
    last_pattern_extract: u64,
}

impl Orchestrator {
    pub fn new(
        perception: Arc<dyn PerceptionProvider>,
        oracle: Arc<dyn DecisionOracle>,
        actuator: Arc<dyn ActuatorProvider>,
        config: AgentConfig,
    ) -> Self {
        let store = match &config.store_path {
            Some(path) => EvolutionStore::new(path.clone()),
            None => EvolutionStore::new(EvolutionStore::default_path()),
        };
        let evolution = SelfEvolution::load(store, config.epsilon);
        let cancel = CancelFlag::new();
        let control = ControlLoop::new(
            perception,
            oracle.clone(),
            actuator,
            config.clone(),
            evolution,
            cancel.clone(),
        );
        let last_pattern_extract = control.evolution.total_actions();
        Self {
            control,
            config,
            cancel,
            last_pattern_extract,
        }
    }

    /// Handle for external shutdown. Cancelling is observed at the next
    /// iteration boundary, never mid-action.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn execute_task(&mut self, task: &str, timeout_seconds: Option<u64>) -> TaskResult {
        let started = Instant::now();
        let timeout = timeout_seconds.unwrap_or(self.config.task_timeout_secs);
        // Wall-clock deadline is fixed once, up front.
        let deadline = started + Duration::from_secs(timeout);

        println!("{}", format!("\n🎯 TASK: {}", task).cyan().bold());

        self.control.begin_task();
        let base_actions = self.control.actions_taken;
        let base_heals = self.control.self_heals;
        let mut reflections = 0u32;
        let mut replans = 0u32;

        let outcome = self
            .run_task(task, deadline, &mut reflections, &mut replans)
            .await;

        let (final_state, error) = match outcome {
            Ok(StepOutcome::Done) => (TaskState::Completed, None),
            Ok(StepOutcome::Stalled(reason)) => (TaskState::Failed, Some(reason)),
            Ok(StepOutcome::Cancelled) => {
                (TaskState::Cancelled, Some("cancelled by caller".to_string()))
            }
            Ok(StepOutcome::TimedOut) => (
                TaskState::Timeout,
                Some(format!("deadline of {}s exceeded", timeout)),
            ),
            Err(e) => (TaskState::Failed, Some(e.to_string())),
        };

        self.control.evolution.checkpoint();
        self.maybe_extract_patterns();

        let result = TaskResult {
            task_id: uuid::Uuid::new_v4().to_string(),
            success: final_state == TaskState::Completed,
            task: task.to_string(),
            actions_taken: self.control.actions_taken - base_actions,
            duration_seconds: started.elapsed().as_secs_f64(),
            error,
            extracted_data: self.control.memory.snapshot(),
            final_state,
            self_heals: self.control.self_heals - base_heals,
            reflections,
            replans,
        };

        let badge = if result.success {
            "✅ TASK COMPLETE".green().bold()
        } else {
            format!("❌ TASK {:?}", result.final_state).to_uppercase().red().bold()
        };
        println!(
            "{} ({} actions, {:.1}s, {} heals)",
            badge, result.actions_taken, result.duration_seconds, result.self_heals
        );
        result
    }

    async fn run_task(
        &mut self,
        task: &str,
        deadline: Instant,
        reflections: &mut u32,
        replans: &mut u32,
    ) -> Result<StepOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(StepOutcome::Cancelled);
        }

        // Strategic decomposition against the opening screen.
        let frame = self.control_capture().await?;
        let hint = self
            .control
            .evolution
            .context_for_prompt(self.control.platform(), task);
        let mut strategic =
            PlanningEngine::strategic(self.oracle(), &frame, task, &hint).await;
        self.control
            .memory
            .start_task(task, strategic.steps.clone());

        loop {
            let Some(goal) = strategic.current_step().map(String::from) else {
                return Ok(StepOutcome::Done);
            };
            println!(
                "{}",
                format!(
                    "\n📌 Goal {}/{}: {}",
                    strategic.cursor() + 1,
                    strategic.steps.len(),
                    goal
                )
                .blue()
                .bold()
            );
            self.control.memory.workflow.begin_step(&goal);

            match self.run_goal(&goal, task, deadline).await? {
                StepOutcome::Done => {
                    self.control.memory.workflow.mark_success(&goal, "goal reached");
                    strategic.advance();
                    self.maybe_extract_patterns();
                }
                StepOutcome::Stalled(reason) => {
                    self.control.memory.workflow.mark_failure(&goal, reason.clone());

                    if *replans >= self.config.max_replans {
                        return Ok(StepOutcome::Stalled(format!(
                            "replan budget exhausted: {}",
                            reason
                        )));
                    }
                    *reflections += 1;
                    *replans += 1;

                    let frame = self.control_capture().await?;
                    let adjustment = match PlanningEngine::reflect(
                        self.oracle(),
                        &frame,
                        &goal,
                        &self.control.history,
                    )
                    .await
                    {
                        Ok(adj) => {
                            println!("{}", format!("🤔 Reflection: {}", adj).magenta());
                            adj
                        }
                        Err(_) => "try a different interaction path".to_string(),
                    };

                    // The strategy is rebuilt against the current screen
                    // from the unfinished goals, with the reflection folded
                    // in. Completed goals never reappear.
                    let adjusted = format!(
                        "{} (the attempt stalled on \"{}\"; {})",
                        strategic.remaining().join(" then "),
                        goal,
                        adjustment
                    );
                    strategic =
                        PlanningEngine::strategic(self.oracle(), &frame, &adjusted, &hint).await;
                    self.control.memory.workflow.remaining_steps = strategic.steps.clone();
                }
                other => return Ok(other),
            }
        }
    }

    /// Tactical planning plus execution for one strategic goal. A stalled
    /// step surfaces to the caller, which owns replanning.
    async fn run_goal(&mut self, goal: &str, task: &str, deadline: Instant) -> Result<StepOutcome> {
        let frame = self.control_capture().await?;
        let elements = self.detect_elements(&frame).await;
        let mut tactical =
            PlanningEngine::tactical(self.oracle(), &frame, goal, &elements).await;

        while let Some(step) = tactical.current_step().map(String::from) {
            match self.control.run_step(&step, task, deadline).await? {
                StepOutcome::Done => {
                    tactical.advance();
                }
                other => return Ok(other),
            }
        }
        Ok(StepOutcome::Done)
    }

    fn oracle(&self) -> &dyn DecisionOracle {
        self.control.oracle()
    }

    // Planning-time captures retry the same way in-step captures do, so a
    // transient screenshot failure between goals cannot fail the task.
    async fn control_capture(&self) -> Result<crate::perception::Frame> {
        self.control.capture().await
    }

    async fn detect_elements(
        &self,
        frame: &crate::perception::Frame,
    ) -> Vec<crate::perception::Element> {
        self.control
            .perception()
            .detect_elements(frame)
            .await
            .unwrap_or_default()
    }

    fn maybe_extract_patterns(&mut self) {
        let total = self.control.evolution.total_actions();
        if total.saturating_sub(self.last_pattern_extract) >= PATTERN_EXTRACT_EVERY {
            let learned = self.control.evolution.extract_patterns();
            self.last_pattern_extract = total;
            if learned > 0 {
                println!(
                    "{}",
                    format!("🧠 Distilled {} new interaction patterns", learned).magenta()
                );
            }
        }
    }

    /// Lifetime learning statistics plus this process's loop counters.
    pub fn stats(&self) -> Value {
        let mut stats = self.control.evolution.stats();
        stats["session"] = json!({
            "actions_taken": self.control.actions_taken,
            "self_heals": self.control.self_heals,
            "oracle_calls": self.control.oracle_calls,
        });
        stats
    }

    /// Drop all learned state. Irreversible.
    pub fn reset_learning(&mut self) {
        self.control.evolution.reset();
        println!("{}", "🗑️  Learned state cleared".yellow());
    }
}
