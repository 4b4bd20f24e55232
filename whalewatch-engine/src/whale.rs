//! Whale trade detection and sentiment metrics.
//!
//! Pure functions over the retained trade buffers: threshold check, magnitude
//! score, value-proximity pattern matching, and whale-volume bull/bear power.

use crate::event::SimilarPattern;
use crate::scoring::clamp01;
use chrono::{DateTime, Utc};

/// Lookback of the similar-pattern search, in trades.
const PATTERN_LOOKBACK: usize = 50;
/// Maximum similar patterns returned.
const PATTERN_LIMIT: usize = 3;
/// Whale volume at which momentum saturates.
const MOMENTUM_SATURATION_USD: f64 = 10_000_000.0;

/// Minimal trade view shared by the whale metrics; the state layer keeps
/// these in its bounded buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSeen {
    pub id: i64,
    pub ts_ms: i64,
    pub price: f64,
    pub value: f64,
    pub is_buy: bool,
    pub aggression: f64,
}

impl TradeSeen {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts_ms)
    }
}

/// Net whale buy/sell pressure over the retained tape.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BullBearPower {
    pub net_buy_volume: f64,
    pub net_sell_volume: f64,
    /// -1 (all sells) to 1 (all buys).
    pub bull_power: f64,
    /// Trend strength, 0..1.
    pub momentum: f64,
}

/// Check whether a notional crosses the whale threshold.
pub fn is_whale(trade_value: f64, threshold: f64) -> bool {
    trade_value >= threshold
}

/// Whale magnitude score, 0..1.
///
/// Zero below the threshold; linear from the threshold up to the cap, with a
/// 0.1 floor so any whale registers visibly.
pub fn whale_score(trade_value: f64, threshold: f64, cap: f64) -> f64 {
    if !is_whale(trade_value, threshold) {
        return 0.0;
    }
    let span = (cap - threshold).max(1.0);
    ((trade_value - threshold) / span).min(1.0).max(0.1)
}

/// Find up to three same-side whales from the recent tape, scored by value
/// proximity: `1 - |v_a - v_b| / max(v_a, v_b)`.
pub fn find_similar_patterns(
    trade_value: f64,
    is_buy: bool,
    recent: &[TradeSeen],
    threshold: f64,
) -> Vec<SimilarPattern> {
    let start = recent.len().saturating_sub(PATTERN_LOOKBACK);
    let mut scored: Vec<SimilarPattern> = recent[start..]
        .iter()
        .filter(|t| t.is_buy == is_buy && is_whale(t.value, threshold))
        .filter_map(|t| {
            let denominator = t.value.max(trade_value);
            if denominator <= 0.0 {
                return None;
            }
            Some(SimilarPattern {
                trade_id: t.id,
                timestamp: t.timestamp()?,
                price: t.price,
                value: t.value,
                is_buy: t.is_buy,
                similarity_score: 1.0 - (t.value - trade_value).abs() / denominator,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(PATTERN_LIMIT);
    scored
}

/// Whale buy vs sell volume over the retained tape.
pub fn bull_bear_power(recent: &[TradeSeen], threshold: f64) -> BullBearPower {
    let mut buy_volume = 0.0;
    let mut sell_volume = 0.0;
    for trade in recent {
        if !is_whale(trade.value, threshold) {
            continue;
        }
        if trade.is_buy {
            buy_volume += trade.value;
        } else {
            sell_volume += trade.value;
        }
    }

    let total = buy_volume + sell_volume;
    let bull_power = if total > 0.0 {
        (buy_volume - sell_volume) / total
    } else {
        0.0
    };
    let momentum = clamp01(bull_power.abs() * (total / MOMENTUM_SATURATION_USD));

    BullBearPower {
        net_buy_volume: buy_volume,
        net_sell_volume: sell_volume,
        bull_power,
        momentum,
    }
}
