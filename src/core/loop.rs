use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::actuator::{dispatch, ActuatorProvider};
use crate::antiloop::{AntiLoopEngine, BreakStrategy};
use crate::core::action::{Action, ActionResult, Decision, ScrollDirection};
use crate::core::planner::PlanningEngine;
use crate::core::state::{AgentConfig, CancelFlag, FastPathRules};
use crate::evolution::SelfEvolution;
use crate::memory::WorkingMemory;
use crate::oracle::{DecisionOracle, OracleError, PromptContext, RetryPolicy};
use crate::perception::{Element, Frame, PerceptionProvider};
use crate::timer::AdaptiveTimer;
use crate::vision::VisionVerifier;

/// Words in a completion verdict's reasoning that corroborate success when
/// confidence alone is borderline.
const SUCCESS_KEYWORDS: &[&str] = &[
    "complete", "success", "done", "fulfill", "achieve", "ready", "loaded", "display", "showing",
    "visible", "open", "navigated",
];

const CAPTURE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step was finished and the completion check agreed.
    Done,
    /// The action budget ran out or the step could not make progress.
    Stalled(String),
    Cancelled,
    TimedOut,
}

/// One observe-decide-act engine, shared across all steps of a task so the
/// loop detectors and timing profile carry over.
pub struct ControlLoop {
    perception: Arc<dyn PerceptionProvider>,
    oracle: Arc<dyn DecisionOracle>,
    actuator: Arc<dyn ActuatorProvider>,
    config: AgentConfig,
    cancel: CancelFlag,
    retry: RetryPolicy,
    fast_path: FastPathRules,

    pub antiloop: AntiLoopEngine,
    pub verifier: VisionVerifier,
    pub timer: AdaptiveTimer,
    pub evolution: SelfEvolution,
    pub memory: WorkingMemory,

    /// Platform key for learning, tracked from navigate/open_app actions.
    platform: String,
    pub history: Vec<ActionResult>,
    pub actions_taken: u32,
    /// Value of `actions_taken` when the current task started; the per-task
    /// budget is measured against this baseline.
    task_base_actions: u32,
    pub self_heals: u32,
    pub oracle_calls: u32,
    last_confidence: f64,
}

impl ControlLoop {
    pub fn new(
        perception: Arc<dyn PerceptionProvider>,
        oracle: Arc<dyn DecisionOracle>,
        actuator: Arc<dyn ActuatorProvider>,
        config: AgentConfig,
        evolution: SelfEvolution,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            perception,
            oracle,
            actuator,
            config,
            cancel,
            retry: RetryPolicy::default(),
            fast_path: FastPathRules::default(),
            antiloop: AntiLoopEngine::default(),
            verifier: VisionVerifier::default(),
            timer: AdaptiveTimer::new(),
            evolution,
            memory: WorkingMemory::new(),
            platform: "unknown".to_string(),
            history: Vec::new(),
            actions_taken: 0,
            task_base_actions: 0,
            self_heals: 0,
            oracle_calls: 0,
            last_confidence: 0.0,
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Start a fresh task: reset the per-task budget baseline and every
    /// detector that reasons over recent history. Lifetime counters and
    /// learned state carry over.
    pub fn begin_task(&mut self) {
        self.task_base_actions = self.actions_taken;
        self.history.clear();
        self.antiloop.clear();
        self.verifier.reset();
    }

    pub fn perception(&self) -> &dyn PerceptionProvider {
        self.perception.as_ref()
    }

    pub fn oracle(&self) -> &dyn DecisionOracle {
        self.oracle.as_ref()
    }

    /// Drive one step of a plan to completion. Returns when the step is
    /// verified done, the sub-iteration budget runs out, the deadline
    /// passes, or cancellation is observed.
    pub async fn run_step(
        &mut self,
        step: &str,
        overall_task: &str,
        deadline: Instant,
    ) -> Result<StepOutcome> {
        for sub_iter in 0..self.config.max_sub_iterations {
            if self.cancel.is_cancelled() {
                return Ok(StepOutcome::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(StepOutcome::TimedOut);
            }
            if self.actions_taken - self.task_base_actions >= self.config.max_iterations {
                return Ok(StepOutcome::Stalled("task action budget exhausted".into()));
            }

            // Observe.
            let frame = self.capture().await?;
            let elements = self
                .perception
                .detect_elements(&frame)
                .await
                .unwrap_or_default();

            // Orient: are we thrashing?
            if self.antiloop.is_looping() || self.verifier.is_stuck() {
                self.self_heal(step).await;
                continue;
            }

            // Decide: fast path first, then the oracle.
            let (decision, fast) = match self.fast_path.match_step(step, &elements) {
                Some(d) => {
                    println!("{}", format!("⚡ {}", d.reason).cyan());
                    (d, true)
                }
                None => {
                    let decision = self.decide(&frame, step, overall_task, &elements).await;
                    // Whatever the oracle saw is kept for later steps.
                    if let Some(observation) = &decision.observation {
                        self.memory.extract(
                            &self.platform,
                            "observation",
                            Value::String(observation.clone()),
                            decision.confidence.unwrap_or(0.5),
                        );
                    }
                    (decision, false)
                }
            };

            // Done claims are checked, not trusted.
            if matches!(decision.action, Action::Done) {
                self.last_confidence = decision.confidence.unwrap_or(0.0);
                if self.verify_done(step, overall_task).await {
                    println!("{}", format!("✅ Step complete: {}", step).green());
                    return Ok(StepOutcome::Done);
                }
                println!("{}", "🔍 Completion claim rejected, continuing".yellow());
                self.antiloop.record(decision.action.signature());
                continue;
            }

            // Act.
            println!(
                "  {} {}",
                format!("[{}]", sub_iter + 1).dimmed(),
                decision.action.to_string().white()
            );
            let result = dispatch(self.actuator.as_ref(), &decision.action).await;
            self.actions_taken += 1;
            self.antiloop.record(decision.action.signature());
            self.track_platform(&decision.action);

            // Settle, then compare frames so slow UIs are not misread as stuck.
            tokio::time::sleep(self.timer.get_wait(decision.action.kind())).await;
            let changed = match self.capture().await {
                Ok(after) => self.verifier.changed(&frame, &after),
                Err(_) => true,
            };
            self.timer.record(decision.action.kind(), result.duration);

            // Learn. Waiting is not expected to change pixels.
            let effective = result.success
                && (changed || matches!(decision.action, Action::Wait { .. }));
            self.evolution.record_experience(
                &self.platform,
                &elements,
                overall_task,
                decision.action.kind(),
                &decision.action.to_string(),
                decision.action.params(),
                effective,
                result.duration.as_secs_f64(),
                result.error.as_deref().unwrap_or(""),
            );
            self.history.push(result);

            // A mechanical step is one-shot: once its action lands and the
            // screen moves, the step is done without a completion check.
            if fast && effective {
                println!("{}", format!("✅ Step complete: {}", step).green());
                return Ok(StepOutcome::Done);
            }

            if let Some(reason) = PlanningEngine::heuristic_stuck(&self.history) {
                println!("{}", format!("🔄 {}", reason).yellow());
                self.self_heal(step).await;
            }
        }

        Ok(StepOutcome::Stalled(format!(
            "step budget of {} actions exhausted: {}",
            self.config.max_sub_iterations, step
        )))
    }

    pub(crate) async fn capture(&self) -> Result<Frame> {
        let mut last_err = None;
        for attempt in 0..CAPTURE_ATTEMPTS {
            match self.perception.capture().await {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < CAPTURE_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("capture failed")))
            .context("screen capture failed after retries")
    }

    async fn decide(
        &mut self,
        frame: &Frame,
        step: &str,
        overall_task: &str,
        elements: &[Element],
    ) -> Decision {
        let repetition_warning = self.history.last().and_then(|last| {
            let repeats = self
                .history
                .iter()
                .rev()
                .take_while(|r| r.summary == last.summary)
                .count();
            if repeats >= 3 {
                Some(format!(
                    "STOP REPEATING: {} was already tried {} times without finishing the step",
                    last.summary, repeats
                ))
            } else {
                None
            }
        });

        let mut learned_hint = self
            .evolution
            .context_for_prompt(&self.platform, overall_task);
        let (kind, prob) = self.evolution.best_action(
            &self.platform,
            elements,
            step,
            &["click", "type", "hotkey", "scroll", "navigate", "open_app"],
        );
        if prob > 0.6 {
            learned_hint.push_str(&format!(
                "\nIn this context '{}' has historically worked ({:.0}% expected success)",
                kind,
                prob * 100.0
            ));
        }

        let context = PromptContext {
            task: overall_task.to_string(),
            step: step.to_string(),
            history: self
                .history
                .iter()
                .rev()
                .take(10)
                .rev()
                .map(|r| r.summary.clone())
                .collect(),
            repetition_warning,
            elements: elements.to_vec(),
            learned_hint,
        };

        self.oracle_calls += 1;
        let oracle = self.oracle.clone();
        let outcome = self
            .retry
            .run(&self.cancel, || {
                let oracle = oracle.clone();
                let context = context.clone();
                let frame = frame;
                async move { oracle.decide(frame, &context).await }
            })
            .await;

        match outcome {
            Ok(decision) => {
                self.last_confidence = decision.confidence.unwrap_or(0.0);
                decision
            }
            Err(OracleError::Malformed(_)) => {
                // Unreadable reply: idle briefly instead of acting on noise.
                eprintln!("{}", "⚠️ Oracle reply unreadable, waiting".yellow());
                Decision::new(
                    Action::Wait { seconds: 1.0 },
                    "oracle reply was unreadable, pausing before retry",
                )
            }
            Err(e) => {
                eprintln!("{}", format!("⚠️ Oracle unreachable: {}", e).yellow());
                Decision::new(
                    Action::Wait { seconds: 2.0 },
                    "decision service unreachable, pausing",
                )
            }
        }
    }

    /// Second opinion on a completion claim. Skipped when the deciding call
    /// was already confident enough.
    async fn verify_done(&mut self, step: &str, overall_task: &str) -> bool {
        if self.last_confidence > self.config.verify_skip_confidence {
            return true;
        }

        let frame = match self.capture().await {
            Ok(f) => f,
            // No frame to judge with: accept rather than deadlock the step.
            Err(_) => return true,
        };

        let prompt = format!(
            r#"Judge whether this step is complete based on what the screen shows.

OVERALL TASK: {}
STEP: {}

RESPOND WITH JSON ONLY:
{{ "complete": true|false, "confidence": 0.0-1.0, "reason": "..." }}"#,
            overall_task, step
        );

        self.oracle_calls += 1;
        match self.oracle.query(&frame, &prompt).await {
            Ok(value) => {
                let complete = value["complete"].as_bool().unwrap_or(false);
                let confidence = value["confidence"].as_f64().unwrap_or(0.0);
                let reason = value["reason"].as_str().unwrap_or("").to_lowercase();
                if !complete {
                    return false;
                }
                confidence >= self.config.done_accept_confidence
                    || (confidence >= self.config.done_keyword_confidence
                        && SUCCESS_KEYWORDS.iter().any(|k| reason.contains(k)))
            }
            // Verification is advisory. Fail open on oracle trouble.
            Err(_) => true,
        }
    }

    /// Break out of a detected loop: one scripted action chosen from the
    /// repeating signature, then both detectors start fresh.
    async fn self_heal(&mut self, step: &str) {
        let strategy = self.antiloop.break_strategy();
        println!(
            "{}",
            format!("🩹 Self-heal on \"{}\": {:?}", step, strategy).magenta()
        );

        let action = match strategy {
            BreakStrategy::ScrollDown => Action::Scroll {
                direction: ScrollDirection::Down,
                amount: 3,
            },
            BreakStrategy::PressEscape => Action::Hotkey {
                keys: vec!["escape".to_string()],
            },
            BreakStrategy::PressEnter => Action::Hotkey {
                keys: vec!["enter".to_string()],
            },
            BreakStrategy::WaitAndRetry => Action::Wait { seconds: 2.0 },
        };

        let result = dispatch(self.actuator.as_ref(), &action).await;
        self.history.push(result);
        self.antiloop.clear();
        self.verifier.reset();
        self.self_heals += 1;
    }

    fn track_platform(&mut self, action: &Action) {
        match action {
            Action::Navigate { url } => {
                if let Ok(parsed) = Url::parse(url) {
                    if let Some(host) = parsed.host_str() {
                        self.platform = host.trim_start_matches("www.").to_string();
                    }
                }
            }
            Action::OpenApp { name } => {
                self.platform = name.to_lowercase();
            }
            _ => {}
        }
    }
}
