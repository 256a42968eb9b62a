//! Per-action-kind wait estimation. A rolling 80th percentile over the last
//! 20 observed latencies, floored by a fixed baseline per kind. Cheap and
//! deterministic; no model.

use std::collections::HashMap;
use std::time::Duration;

const HISTORY_CAP: usize = 20;
const MIN_SAMPLES: usize = 3;
const BUFFER_SECS: f64 = 0.5;

pub struct AdaptiveTimer {
    samples: HashMap<String, Vec<f64>>,
}

impl Default for AdaptiveTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveTimer {
    pub fn new() -> Self {
        Self { samples: HashMap::new() }
    }

    fn baseline(kind: &str) -> f64 {
        match kind {
            "navigate" => 6.0,
            "open_app" => 1.0,
            "search" => 3.0,
            "click" => 0.5,
            "type" => 0.3,
            "hotkey" => 0.3,
            "scroll" => 0.3,
            "wait" => 5.0,
            _ => 1.0,
        }
    }

    /// Wait to apply after an action of `kind`. With fewer than 3 samples
    /// this is exactly the baseline; otherwise max(baseline, p80 + 0.5s).
    pub fn get_wait(&self, kind: &str) -> Duration {
        let base = Self::baseline(kind);
        let secs = match self.samples.get(kind) {
            Some(times) if times.len() >= MIN_SAMPLES => {
                let mut sorted = times.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let idx = ((sorted.len() as f64) * 0.8) as usize;
                let p80 = sorted[idx.min(sorted.len() - 1)];
                base.max(p80 + BUFFER_SECS)
            }
            _ => base,
        };
        Duration::from_secs_f64(secs)
    }

    /// Record an observed latency, keeping only the most recent 20.
    pub fn record(&mut self, kind: &str, duration: Duration) {
        let times = self.samples.entry(kind.to_string()).or_default();
        times.push(duration.as_secs_f64());
        if times.len() > HISTORY_CAP {
            let excess = times.len() - HISTORY_CAP;
            times.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_below_three_samples() {
        let mut t = AdaptiveTimer::new();
        assert_eq!(t.get_wait("navigate"), Duration::from_secs_f64(6.0));
        t.record("navigate", Duration::from_secs_f64(9.0));
        t.record("navigate", Duration::from_secs_f64(9.0));
        // Still only two samples: baseline.
        assert_eq!(t.get_wait("navigate"), Duration::from_secs_f64(6.0));
    }

    #[test]
    fn test_p80_plus_buffer_with_history() {
        let mut t = AdaptiveTimer::new();
        for s in [1.0, 1.0, 1.0, 1.0, 5.0] {
            t.record("click", Duration::from_secs_f64(s));
        }
        // p80 of [1,1,1,1,5] is the element at index 4 = 5.0.
        let wait = t.get_wait("click").as_secs_f64();
        assert!(wait >= 5.0 + 0.5 - 1e-9, "wait was {wait}");
    }

    #[test]
    fn test_baseline_floor_holds() {
        let mut t = AdaptiveTimer::new();
        for _ in 0..5 {
            t.record("navigate", Duration::from_secs_f64(0.1));
        }
        // Fast samples never push the wait below the 6s navigate baseline.
        assert_eq!(t.get_wait("navigate"), Duration::from_secs_f64(6.0));
    }

    #[test]
    fn test_history_capped() {
        let mut t = AdaptiveTimer::new();
        for i in 0..50 {
            t.record("click", Duration::from_secs_f64(i as f64));
        }
        assert_eq!(t.samples.get("click").unwrap().len(), 20);
        // Oldest samples dropped: remaining are 30..=49.
        assert_eq!(t.samples.get("click").unwrap()[0], 30.0);
    }

    #[test]
    fn test_unknown_kind_default_baseline() {
        let t = AdaptiveTimer::new();
        assert_eq!(t.get_wait("drag"), Duration::from_secs_f64(1.0));
    }
}
