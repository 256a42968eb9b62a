//! Actuator seam: how decided actions reach the desktop session. The loop
//! never touches input injection directly; it goes through this trait so the
//! whole control stack runs against a mock in tests.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;

use crate::core::action::{Action, ActionResult, ScrollDirection};

#[async_trait]
pub trait ActuatorProvider: Send + Sync {
    async fn click(&self, x: i32, y: i32) -> Result<()>;
    async fn type_text(&self, text: &str) -> Result<()>;
    async fn hotkey(&self, keys: &[String]) -> Result<()>;
    async fn scroll(&self, direction: ScrollDirection, amount: i32) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn open_app(&self, name: &str) -> Result<()>;
}

/// Route one action to the provider and fold the outcome into an
/// [`ActionResult`]. Provider errors become a failed result rather than
/// propagating, so one flaky injection never kills the loop.
pub async fn dispatch(provider: &dyn ActuatorProvider, action: &Action) -> ActionResult {
    let started = Instant::now();
    let outcome: Result<()> = match action {
        Action::Click { x, y } => provider.click(*x, *y).await,
        Action::Type { text } => provider.type_text(text).await,
        Action::Hotkey { keys } => provider.hotkey(keys).await,
        Action::Scroll { direction, amount } => provider.scroll(*direction, *amount).await,
        Action::Navigate { url } => provider.navigate(url).await,
        Action::OpenApp { name } => provider.open_app(name).await,
        Action::Wait { seconds } => {
            tokio::time::sleep(std::time::Duration::from_secs_f64(*seconds)).await;
            Ok(())
        }
        // Completion is claimed, not performed. The loop verifies it.
        Action::Done => Ok(()),
    };
    let duration = started.elapsed();

    match outcome {
        Ok(()) => ActionResult::ok(action, duration),
        Err(e) => ActionResult::failed(action, e.to_string(), duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingActuator {
        calls: Mutex<Vec<String>>,
        fail_clicks: bool,
    }

    impl RecordingActuator {
        fn new(fail_clicks: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_clicks,
            }
        }
    }

    #[async_trait]
    impl ActuatorProvider for RecordingActuator {
        async fn click(&self, x: i32, y: i32) -> Result<()> {
            self.calls.lock().unwrap().push(format!("click {} {}", x, y));
            if self.fail_clicks {
                anyhow::bail!("injection refused");
            }
            Ok(())
        }
        async fn type_text(&self, text: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("type {}", text));
            Ok(())
        }
        async fn hotkey(&self, keys: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(format!("hotkey {}", keys.join("+")));
            Ok(())
        }
        async fn scroll(&self, direction: ScrollDirection, amount: i32) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("scroll {:?} {}", direction, amount));
            Ok(())
        }
        async fn navigate(&self, url: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("navigate {}", url));
            Ok(())
        }
        async fn open_app(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("open {}", name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_provider() {
        let actuator = RecordingActuator::new(false);
        let result = dispatch(&actuator, &Action::Click { x: 10, y: 20 }).await;
        assert!(result.success);
        assert_eq!(result.kind, "click");
        assert_eq!(actuator.calls.lock().unwrap()[0], "click 10 20");
    }

    #[tokio::test]
    async fn test_dispatch_failure_becomes_failed_result() {
        let actuator = RecordingActuator::new(true);
        let result = dispatch(&actuator, &Action::Click { x: 1, y: 1 }).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("injection refused"));
    }

    #[tokio::test]
    async fn test_done_touches_nothing() {
        let actuator = RecordingActuator::new(false);
        let result = dispatch(&actuator, &Action::Done).await;
        assert!(result.success);
        assert!(actuator.calls.lock().unwrap().is_empty());
    }
}
