//! End-to-end loop tests against scripted perception, oracle, and actuator
//! mocks. No network, no real screen; paused tokio time makes the adaptive
//! waits free.

use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use screenpilot::actuator::ActuatorProvider;
use screenpilot::core::action::{Action, Decision, ScrollDirection};
use screenpilot::core::state::AgentConfig;
use screenpilot::oracle::{DecisionOracle, OracleError, PromptContext};
use screenpilot::perception::{Element, Frame, PerceptionProvider};
use screenpilot::{Orchestrator, TaskState};

fn solid(level: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([level, level, level])))
}

fn test_config(dir: &std::path::Path) -> AgentConfig {
    AgentConfig {
        epsilon: 0.0,
        store_path: Some(dir.join("evolution.json")),
        ..AgentConfig::default()
    }
}

/// Screen that starts frozen and begins changing between captures once
/// `unfreeze` is flipped (or immediately when constructed live).
struct ScriptedScreen {
    captures: AtomicUsize,
    changing: AtomicBool,
    elements: Vec<Element>,
}

impl ScriptedScreen {
    fn live(elements: Vec<Element>) -> Self {
        Self {
            captures: AtomicUsize::new(0),
            changing: AtomicBool::new(true),
            elements,
        }
    }

    fn frozen(elements: Vec<Element>) -> Self {
        Self {
            captures: AtomicUsize::new(0),
            changing: AtomicBool::new(false),
            elements,
        }
    }
}

#[async_trait]
impl PerceptionProvider for ScriptedScreen {
    async fn capture(&self) -> Result<Frame> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let image = if self.changing.load(Ordering::SeqCst) {
            if n % 2 == 0 {
                solid(0)
            } else {
                solid(255)
            }
        } else {
            solid(0)
        };
        Ok(Frame::new(image))
    }

    async fn detect_elements(&self, _frame: &Frame) -> Result<Vec<Element>> {
        Ok(self.elements.clone())
    }
}

/// Oracle with pre-scripted replies. Any call past the script is an error,
/// which surfaces as a failed task rather than a hang.
struct ScriptedOracle {
    decisions: Mutex<VecDeque<Decision>>,
    queries: Mutex<VecDeque<Value>>,
    calls: AtomicU32,
}

impl ScriptedOracle {
    fn new(decisions: Vec<Decision>, queries: Vec<Value>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            queries: Mutex::new(queries.into()),
            calls: AtomicU32::new(0),
        }
    }

    fn silent() -> Self {
        Self::new(vec![], vec![])
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, _frame: &Frame, _ctx: &PromptContext) -> Result<Decision, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OracleError::Unavailable("script exhausted".into()))
    }

    async fn query(&self, _frame: &Frame, _prompt: &str) -> Result<Value, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OracleError::Unavailable("script exhausted".into()))
    }
}

/// Actuator that records everything. Scrolling can unfreeze a screen, which
/// models the self-heal shaking a stuck page loose.
struct RecordingActuator {
    log: Mutex<Vec<String>>,
    unfreeze_on_scroll: Option<Arc<ScriptedScreen>>,
}

impl RecordingActuator {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            unfreeze_on_scroll: None,
        }
    }

    fn unfreezing(screen: Arc<ScriptedScreen>) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            unfreeze_on_scroll: Some(screen),
        }
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActuatorProvider for RecordingActuator {
    async fn click(&self, x: i32, y: i32) -> Result<()> {
        self.log.lock().unwrap().push(format!("click {},{}", x, y));
        Ok(())
    }
    async fn type_text(&self, text: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("type {}", text));
        Ok(())
    }
    async fn hotkey(&self, keys: &[String]) -> Result<()> {
        self.log.lock().unwrap().push(format!("hotkey {}", keys.join("+")));
        Ok(())
    }
    async fn scroll(&self, _direction: ScrollDirection, amount: i32) -> Result<()> {
        self.log.lock().unwrap().push(format!("scroll {}", amount));
        if let Some(screen) = &self.unfreeze_on_scroll {
            screen.changing.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
    async fn navigate(&self, url: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("navigate {}", url));
        Ok(())
    }
    async fn open_app(&self, name: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("open {}", name));
        Ok(())
    }
}

/// Screen whose first grab fails, then behaves like a live screen.
struct FlakyScreen {
    captures: AtomicUsize,
}

impl FlakyScreen {
    fn new() -> Self {
        Self { captures: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl PerceptionProvider for FlakyScreen {
    async fn capture(&self) -> Result<Frame> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            return Err(anyhow::anyhow!("transient grab failure"));
        }
        Ok(Frame::new(if n % 2 == 0 { solid(0) } else { solid(255) }))
    }

    async fn detect_elements(&self, _frame: &Frame) -> Result<Vec<Element>> {
        Ok(vec![])
    }
}

fn submit_button() -> Element {
    Element {
        id: "btn-1".into(),
        kind: "button".into(),
        text: "Submit".into(),
        bbox: [100, 200, 80, 24],
        confidence: 0.95,
        interactable: true,
    }
}

#[tokio::test(start_paused = true)]
async fn oracle_driven_task_completes_in_one_action() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    // "check ..." phrasing keeps every step off the fast path.
    let oracle = Arc::new(ScriptedOracle::new(
        vec![
            Decision::new(
                Action::Navigate { url: "https://example.com".into() },
                "bring the page up",
            )
            .with_confidence(0.8),
            Decision::new(Action::Done, "page is loaded").with_confidence(0.95),
        ],
        vec![
            json!({ "goals": ["check that example.com loads"], "confidence": 0.9 }),
            json!({ "steps": ["check the page at example.com"], "confidence": 0.8 }),
        ],
    ));

    let mut orchestrator = Orchestrator::new(
        screen,
        oracle.clone(),
        actuator.clone(),
        test_config(dir.path()),
    );
    let result = orchestrator.execute_task("check that example.com loads", None).await;

    assert!(result.success);
    assert_eq!(result.final_state, TaskState::Completed);
    assert_eq!(result.actions_taken, 1);
    assert_eq!(result.self_heals, 0);
    assert_eq!(actuator.log(), vec!["navigate https://example.com"]);
    // Strategic + tactical + one decide + done decide. High-confidence done
    // skipped the separate completion check.
    assert_eq!(oracle.calls(), 4);
    // Workflow progress counts strategic goals, and the only goal finished.
    assert_eq!(result.extracted_data["workflow"]["progress"], 1.0);
    assert_eq!(result.extracted_data["workflow"]["completed"], 1);
}

#[tokio::test(start_paused = true)]
async fn frozen_screen_triggers_exactly_one_self_heal() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::frozen(vec![submit_button()]));
    let actuator = Arc::new(RecordingActuator::unfreezing(screen.clone()));
    let oracle = Arc::new(ScriptedOracle::silent());

    let mut orchestrator = Orchestrator::new(
        screen,
        oracle.clone(),
        actuator.clone(),
        test_config(dir.path()),
    );
    let result = orchestrator
        .execute_task("click the Submit button", None)
        .await;

    assert!(result.success);
    assert_eq!(result.self_heals, 1);
    assert_eq!(oracle.calls(), 0);

    let log = actuator.log();
    // Clicks until the stuck threshold, one healing scroll, then the click
    // that finally lands on a moving screen.
    assert!(log.iter().filter(|l| l.starts_with("scroll")).count() == 1);
    assert!(log.last().unwrap().starts_with("click"));
}

#[tokio::test(start_paused = true)]
async fn sequenced_task_splits_without_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    let oracle = Arc::new(ScriptedOracle::silent());

    let mut orchestrator = Orchestrator::new(
        screen,
        oracle.clone(),
        actuator.clone(),
        test_config(dir.path()),
    );
    let result = orchestrator
        .execute_task("open mail then open calendar", None)
        .await;

    assert!(result.success);
    assert_eq!(result.actions_taken, 2);
    assert_eq!(oracle.calls(), 0);
    assert_eq!(actuator.log(), vec!["open mail", "open calendar"]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_start_takes_no_action() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    let oracle = Arc::new(ScriptedOracle::silent());

    let mut orchestrator = Orchestrator::new(
        screen,
        oracle,
        actuator.clone(),
        test_config(dir.path()),
    );
    orchestrator.cancel_flag().cancel();
    let result = orchestrator.execute_task("open mail", None).await;

    assert!(!result.success);
    assert_eq!(result.final_state, TaskState::Cancelled);
    assert_eq!(result.actions_taken, 0);
    assert!(actuator.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn action_budget_resets_between_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    let oracle = Arc::new(ScriptedOracle::silent());

    let mut config = test_config(dir.path());
    config.max_iterations = 2;

    let mut orchestrator = Orchestrator::new(screen, oracle, actuator.clone(), config);
    let first = orchestrator
        .execute_task("open mail then open calendar", None)
        .await;
    assert!(first.success);
    assert_eq!(first.actions_taken, 2);

    // The first task spent the whole cap; a fresh task gets a fresh budget.
    let second = orchestrator.execute_task("open notes", None).await;
    assert!(second.success);
    assert_eq!(second.actions_taken, 1);
}

#[tokio::test(start_paused = true)]
async fn oracle_observations_land_in_extracted_data() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    let oracle = Arc::new(ScriptedOracle::new(
        vec![
            Decision::new(
                Action::Navigate { url: "https://example.com/pricing".into() },
                "bring the pricing page up",
            )
            .with_confidence(0.8)
            .with_observation("the pricing table shows three tiers"),
            Decision::new(Action::Done, "pricing visible").with_confidence(0.95),
        ],
        vec![
            json!({ "goals": ["check the pricing page"], "confidence": 0.9 }),
            json!({ "steps": ["check the pricing table"], "confidence": 0.8 }),
        ],
    ));

    let mut orchestrator = Orchestrator::new(
        screen,
        oracle,
        actuator.clone(),
        test_config(dir.path()),
    );
    let result = orchestrator.execute_task("check the pricing page", None).await;

    assert!(result.success);
    let extractions = result.extracted_data["extractions"].as_array().unwrap();
    assert_eq!(extractions.len(), 1);
    assert_eq!(extractions[0]["kind"], "observation");
    assert!(extractions[0]["data"]
        .as_str()
        .unwrap()
        .contains("three tiers"));
}

#[tokio::test(start_paused = true)]
async fn stalled_goal_triggers_strategic_replan() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    // The first decomposition leads nowhere: its only step burns the step
    // budget on degraded waits. Reflection then feeds a rebuilt strategy
    // whose goal resolves on the fast path.
    let oracle = Arc::new(ScriptedOracle::new(
        vec![],
        vec![
            json!({ "goals": ["do the first pass"], "confidence": 0.9 }),
            json!({ "steps": ["review the panel contents"], "confidence": 0.8 }),
            json!({ "assessment": "the panel never loads", "adjustment": "open mail instead" }),
            json!({ "goals": ["open mail"], "confidence": 0.9 }),
        ],
    ));

    let mut config = test_config(dir.path());
    config.max_sub_iterations = 2;

    let mut orchestrator = Orchestrator::new(screen, oracle, actuator.clone(), config);
    let result = orchestrator
        .execute_task("locate the archived report summary for review", None)
        .await;

    assert!(result.success);
    assert_eq!(result.replans, 1);
    assert_eq!(result.reflections, 1);
    // The rebuilt strategy reached the screen; the dead-end one never did.
    assert_eq!(actuator.log(), vec!["open mail"]);
}

#[tokio::test(start_paused = true)]
async fn transient_capture_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(FlakyScreen::new());
    let actuator = Arc::new(RecordingActuator::new());
    let oracle = Arc::new(ScriptedOracle::silent());

    let mut orchestrator = Orchestrator::new(
        screen,
        oracle,
        actuator.clone(),
        test_config(dir.path()),
    );
    let result = orchestrator.execute_task("open mail", None).await;

    assert!(result.success);
    assert_eq!(result.actions_taken, 1);
    assert_eq!(actuator.log(), vec!["open mail"]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_oracle_fails_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let screen = Arc::new(ScriptedScreen::live(vec![]));
    let actuator = Arc::new(RecordingActuator::new());
    // No script at all: planning falls back, decisions degrade to waits,
    // and the step budget eventually calls the task failed.
    let oracle = Arc::new(ScriptedOracle::silent());

    let mut config = test_config(dir.path());
    config.max_sub_iterations = 3;
    config.max_replans = 1;

    let mut orchestrator = Orchestrator::new(screen, oracle, actuator.clone(), config);
    let result = orchestrator
        .execute_task("summarize the quarterly report on screen", None)
        .await;

    assert!(!result.success);
    assert_eq!(result.final_state, TaskState::Failed);
    assert_eq!(result.replans, 1);
    assert!(result.error.unwrap().contains("replan budget"));
}
