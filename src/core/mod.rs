pub mod action;
pub mod r#loop;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod state;
