//! Per-trade aggression scoring.
//!
//! Pure arithmetic over a trade's notional and the recent tape: a log-scaled
//! size component blended with an inter-arrival speed component. The scorer
//! is the only writer of the rolling average and the last-event timestamp,
//! and must be fed exactly once per processed trade in timestamp order.

use std::collections::VecDeque;

/// Gap at which the speed score reaches 1.0 (a trade arriving instantly
/// after the previous one).
const SPEED_WINDOW_MS: f64 = 500.0;
/// Assumed gap when no prior trade exists; yields a speed score of 0.
const DEFAULT_GAP_MS: f64 = 1_000.0;
/// A trade 6x the recent average saturates the size score.
const SIZE_SATURATION_RATIO: f64 = 6.0;
const SIZE_WEIGHT: f64 = 0.7;
const SPEED_WEIGHT: f64 = 0.3;

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Derived metrics for a single trade.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureScore {
    pub size_score: f64,
    pub speed_score: f64,
    pub aggression: f64,
}

/// Rolling tape statistics feeding [`FeatureScore`].
///
/// The average is maintained in O(1) over a bounded window
/// (drop-oldest-add-newest), never by full rescan.
#[derive(Debug, Clone)]
pub struct FeatureScorer {
    window: VecDeque<f64>,
    window_cap: usize,
    window_sum: f64,
    last_event_ts: Option<i64>,
}

impl FeatureScorer {
    pub fn new(window_cap: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_cap),
            window_cap: window_cap.max(1),
            window_sum: 0.0,
            last_event_ts: None,
        }
    }

    /// Score a trade against the tape seen so far, then absorb it into the
    /// rolling state. The average deliberately excludes the trade itself so
    /// the first trade of a session is never "aggressive" by size.
    pub fn observe(&mut self, trade_value: f64, event_ts_ms: i64) -> FeatureScore {
        let recent_avg = self.recent_avg().unwrap_or(trade_value);
        let denominator = recent_avg.max(1.0);
        let ratio = trade_value / denominator;
        let size_score = clamp01(ratio.max(1.0).ln() / SIZE_SATURATION_RATIO.ln());

        let gap_ms = match self.last_event_ts {
            Some(last) => (event_ts_ms - last).max(0) as f64,
            None => DEFAULT_GAP_MS,
        };
        let speed_score = clamp01((SPEED_WINDOW_MS - gap_ms) / SPEED_WINDOW_MS);

        let aggression = clamp01(SIZE_WEIGHT * size_score + SPEED_WEIGHT * speed_score);

        self.last_event_ts = Some(event_ts_ms);
        self.push_value(trade_value);

        FeatureScore {
            size_score,
            speed_score,
            aggression,
        }
    }

    /// Mean notional of the trades currently in the window.
    pub fn recent_avg(&self) -> Option<f64> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.window_sum / self.window.len() as f64)
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.window_sum = 0.0;
        self.last_event_ts = None;
    }

    fn push_value(&mut self, trade_value: f64) {
        if self.window.len() >= self.window_cap {
            if let Some(oldest) = self.window.pop_front() {
                self.window_sum -= oldest;
            }
        }
        self.window.push_back(trade_value);
        self.window_sum += trade_value;
    }
}
