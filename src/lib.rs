//! screenpilot: a perception-action loop that drives a remote desktop
//! session toward a natural-language goal. Observe a frame, decide one
//! action, act, verify the screen moved, learn from the outcome, repeat.

pub mod actuator;
pub mod antiloop;
pub mod bridge;
pub mod core;
pub mod evolution;
pub mod memory;
pub mod oracle;
pub mod perception;
pub mod timer;
pub mod vision;

pub use crate::core::orchestrator::{Orchestrator, TaskResult, TaskState};
