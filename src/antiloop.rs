//! Loop detection over recent action signatures. Catches the three shapes
//! that actually occur in practice: A,A,A repeats, A,B,A,B 2-cycles and
//! A,B,C,A,B,C 3-cycles.

use colored::*;
use std::collections::VecDeque;

/// Remedy suggested when a loop is detected. A priority-ordered lookup, not
/// a learned policy; it is meant to stay swappable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakStrategy {
    ScrollDown,
    PressEscape,
    PressEnter,
    WaitAndRetry,
}

pub struct AntiLoopEngine {
    history: VecDeque<String>,
    window: usize,
    max_repeats: usize,
}

impl Default for AntiLoopEngine {
    fn default() -> Self {
        Self::new(8, 3)
    }
}

impl AntiLoopEngine {
    pub fn new(window: usize, max_repeats: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(window * 2),
            window,
            max_repeats,
        }
    }

    /// Record an executed action's signature (`kind:args_hash`).
    pub fn record(&mut self, signature: String) {
        if self.history.len() == self.window * 2 {
            self.history.pop_front();
        }
        self.history.push_back(signature);
    }

    /// First matching rule wins: single-action repeat, then 2-cycle, then
    /// 3-cycle. The repeat rule fires as soon as `max_repeats` entries
    /// exist; the cycle rules wait for a full window.
    pub fn is_looping(&self) -> bool {
        let recent: Vec<&String> = self.history.iter().collect();
        let n = recent.len();

        if n >= self.max_repeats {
            let last = &recent[n - self.max_repeats..];
            if last.windows(2).all(|w| w[0] == w[1]) {
                println!(
                    "{} Loop detected: same action repeated {}x",
                    "🔁".yellow(),
                    self.max_repeats
                );
                return true;
            }
        }

        if n < self.window {
            return false;
        }

        if n >= 4 {
            let l4 = &recent[n - 4..];
            if l4[0] == l4[2] && l4[1] == l4[3] && l4[0] != l4[1] {
                println!("{} Loop detected: 2-action cycle", "🔁".yellow());
                return true;
            }
        }

        if n >= 6 {
            let l6 = &recent[n - 6..];
            if l6[0] == l6[3] && l6[1] == l6[4] && l6[2] == l6[5] && l6[0] != l6[1] {
                println!("{} Loop detected: 3-action cycle", "🔁".yellow());
                return true;
            }
        }

        false
    }

    /// Map the most recent action kind to a remedy.
    pub fn break_strategy(&self) -> BreakStrategy {
        if let Some(last) = self.history.back() {
            if last.starts_with("click") {
                return BreakStrategy::ScrollDown;
            }
            if last.starts_with("scroll") {
                return BreakStrategy::PressEscape;
            }
            if last.starts_with("type") {
                return BreakStrategy::PressEnter;
            }
        }
        BreakStrategy::WaitAndRetry
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(engine: &mut AntiLoopEngine, sigs: &[&str]) {
        for s in sigs {
            engine.record(s.to_string());
        }
    }

    #[test]
    fn test_triple_repeat_detected() {
        let mut e = AntiLoopEngine::new(8, 3);
        // Pad the window with distinct entries, then repeat one.
        fill(&mut e, &["a:1", "b:2", "c:3", "d:4", "e:5"]);
        fill(&mut e, &["click:aa", "click:aa", "click:aa"]);
        assert!(e.is_looping());
    }

    #[test]
    fn test_alternating_distinct_never_loops() {
        let mut e = AntiLoopEngine::new(8, 3);
        for i in 0..16 {
            e.record(format!("k:{}", i));
        }
        assert!(!e.is_looping());
    }

    #[test]
    fn test_two_cycle_detected() {
        let mut e = AntiLoopEngine::new(8, 3);
        fill(&mut e, &["x:1", "y:2", "z:3", "w:4"]);
        fill(&mut e, &["a:1", "b:2", "a:1", "b:2"]);
        assert!(e.is_looping());
    }

    #[test]
    fn test_three_cycle_detected() {
        let mut e = AntiLoopEngine::new(8, 3);
        fill(&mut e, &["x:1", "y:2"]);
        fill(&mut e, &["a:1", "b:2", "c:3", "a:1", "b:2", "c:3"]);
        assert!(e.is_looping());
    }

    #[test]
    fn test_triple_repeat_fires_on_fresh_engine() {
        let mut e = AntiLoopEngine::new(8, 3);
        fill(&mut e, &["click:aa", "click:aa"]);
        assert!(!e.is_looping());
        e.record("click:aa".to_string());
        assert!(e.is_looping());
    }

    #[test]
    fn test_cycles_need_a_full_window() {
        let mut e = AntiLoopEngine::new(8, 3);
        fill(&mut e, &["a:1", "b:2", "a:1", "b:2"]);
        assert!(!e.is_looping());
    }

    #[test]
    fn test_break_strategy_table() {
        let mut e = AntiLoopEngine::default();
        e.record("click:aa".into());
        assert_eq!(e.break_strategy(), BreakStrategy::ScrollDown);
        e.record("scroll:bb".into());
        assert_eq!(e.break_strategy(), BreakStrategy::PressEscape);
        e.record("type:cc".into());
        assert_eq!(e.break_strategy(), BreakStrategy::PressEnter);
        e.record("navigate:dd".into());
        assert_eq!(e.break_strategy(), BreakStrategy::WaitAndRetry);
    }

    #[test]
    fn test_history_capped_at_twice_window() {
        let mut e = AntiLoopEngine::new(8, 3);
        for i in 0..40 {
            e.record(format!("k:{}", i));
        }
        assert_eq!(e.len(), 16);
    }
}
