//! Remaining-time estimation from completion events
//!
//! Keeps the last 30 gaps between consecutive completions. The raw estimate
//! is `items_left * mean(gap)`; it is blended with the previous estimate
//! (10% new) to damp jitter, except when it drops by more than 20% or falls
//! under 15 seconds, where it snaps to the new value.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const HISTORY_CAP: usize = 30;
const ALPHA: f64 = 0.1;
const SNAP_RATIO: f64 = 0.8;
const SNAP_BELOW_SECS: f64 = 15.0;

#[derive(Debug, Default)]
pub struct TimeLeft {
    item_count: usize,
    completed: usize,
    last_completion: Option<Instant>,
    deltas: VecDeque<f64>,
    estimate: Option<f64>,
}

impl TimeLeft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all history. Call once per batch.
    pub fn start(&mut self, item_count: usize) {
        *self = Self {
            item_count,
            ..Self::default()
        };
    }

    pub fn add_completed(&mut self) {
        self.add_completed_at(Instant::now());
    }

    pub fn add_completed_at(&mut self, now: Instant) {
        self.completed += 1;
        if let Some(prev) = self.last_completion {
            self.push_delta(now.saturating_duration_since(prev));
        }
        self.last_completion = Some(now);
        self.update();
    }

    fn push_delta(&mut self, delta: Duration) {
        if self.deltas.len() == HISTORY_CAP {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta.as_secs_f64());
    }

    fn update(&mut self) {
        if self.completed < 2 || self.deltas.is_empty() {
            self.estimate = None;
            return;
        }
        let mean = self.deltas.iter().sum::<f64>() / self.deltas.len() as f64;
        let items_left = self.item_count.saturating_sub(self.completed) as f64;
        let fresh = items_left * mean;

        self.estimate = Some(match self.estimate {
            Some(old) if fresh >= old * SNAP_RATIO && fresh >= SNAP_BELOW_SECS => {
                ALPHA * fresh + (1.0 - ALPHA) * old
            }
            _ => fresh,
        });
    }

    /// Seconds left, `None` until two completions have been seen.
    pub fn remaining_secs(&self) -> Option<f64> {
        self.estimate
    }

    pub fn message(&self) -> String {
        match self.estimate {
            Some(secs) => format_remaining(secs),
            None => "Calculating time left...".to_string(),
        }
    }
}

pub fn format_remaining(secs: f64) -> String {
    if secs <= 1.0 {
        return "Almost done...".to_string();
    }
    let total = secs as u64;
    let d = total / 86_400;
    let h = (total / 3600) % 24;
    let m = (total / 60) % 60;
    let s = total % 60;

    let mut out = String::new();
    for (value, unit) in [(d, "d"), (h, "h"), (m, "m"), (s, "s")] {
        if value > 0 {
            out.push_str(&format!("{} {} ", value, unit));
        }
    }
    out.push_str("left");
    out
}
