//! Ephemeral pattern markers.
//!
//! A periodic scan over the recent trade window annotates price buckets
//! where clustered same-side flow suggests support, absorption, or
//! distribution. Markers are transient (5s TTL, capped at 6) and owned by
//! the scanner alone; thresholds are preserved as configuration rather than
//! re-derived.

use crate::config::EngineConfig;
use crate::event::Side;
use crate::whale::TradeSeen;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Minimum gap between scans, in milliseconds.
const SCAN_INTERVAL_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Clustered buying holding a level.
    Support,
    /// Clustered selling absorbed without a move.
    Absorption,
    /// Clustered one-sided flow with a directional move.
    Distribution,
    /// Institutional execution signal surfaced as an annotation.
    Signal,
}

impl MarkerKind {
    pub fn label(&self) -> &'static str {
        match self {
            MarkerKind::Support => "Support",
            MarkerKind::Absorption => "Absorption",
            MarkerKind::Distribution => "Distribution",
            MarkerKind::Signal => "Signal",
        }
    }
}

/// Transient annotation at a price level.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMarker {
    pub id: u64,
    pub kind: MarkerKind,
    pub label: String,
    pub price: f64,
    pub side: Side,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    bucket_key: Option<i64>,
}

/// Owns the marker list and the scan cadence.
#[derive(Debug, Clone)]
pub struct PatternScanner {
    cfg: EngineConfig,
    markers: VecDeque<PatternMarker>,
    next_id: u64,
    last_scan_ms: Option<i64>,
}

impl PatternScanner {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            markers: VecDeque::new(),
            next_id: 0,
            last_scan_ms: None,
        }
    }

    /// Scan the recent tape for clustered same-side flow. Rate-limited to
    /// one pass per second; callers invoke it every tick.
    pub fn scan(&mut self, recent: &[TradeSeen], bucket_size_usd: f64, now_ms: i64) {
        if self
            .last_scan_ms
            .is_some_and(|last| now_ms - last < SCAN_INTERVAL_MS)
        {
            return;
        }
        self.last_scan_ms = Some(now_ms);
        self.purge(now_ms);

        let bucket_size = bucket_size_usd.max(self.cfg.bucket_floor_usd);
        let window_start = now_ms - self.cfg.marker_window_ms;

        // Cluster window trades per price bucket, preserving tape order.
        let mut clusters: HashMap<i64, Vec<&TradeSeen>> = HashMap::new();
        for trade in recent.iter().filter(|t| t.ts_ms >= window_start) {
            let key = (trade.price / bucket_size).round() as i64;
            clusters.entry(key).or_default().push(trade);
        }

        let mut keys: Vec<i64> = clusters.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            if self.bucket_active(key) {
                continue;
            }
            let trades = &clusters[&key];
            let buys = trades.iter().filter(|t| t.is_buy).count();
            let sells = trades.len() - buys;
            let (side, count) = if buys >= sells {
                (Side::Buy, buys)
            } else {
                (Side::Sell, sells)
            };
            if count < self.cfg.marker_min_trades {
                continue;
            }

            let first = trades[0].price;
            let last = trades[trades.len() - 1].price;
            if first <= 0.0 {
                continue;
            }
            let move_pct = (last - first) / first * 100.0;

            let kind = if move_pct.abs() > self.cfg.marker_move_pct {
                MarkerKind::Distribution
            } else if side.is_buy() {
                MarkerKind::Support
            } else {
                MarkerKind::Absorption
            };

            let price = key as f64 * bucket_size;
            self.push_marker(PatternMarker {
                id: self.next_id,
                kind,
                label: kind.label().to_string(),
                price,
                side,
                created_at_ms: now_ms,
                expires_at_ms: now_ms + self.cfg.marker_ttl_ms,
                bucket_key: Some(key),
            });
            debug!(?kind, price, count, "pattern marker emitted");
        }
    }

    /// Surface an institutional execution signal as a marker at the given
    /// price, bypassing the cluster thresholds.
    pub fn push_signal_marker(&mut self, label: &str, price: f64, side: Side, now_ms: i64) {
        self.purge(now_ms);
        self.push_marker(PatternMarker {
            id: self.next_id,
            kind: MarkerKind::Signal,
            label: label.to_string(),
            price,
            side,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + self.cfg.marker_ttl_ms,
            bucket_key: None,
        });
    }

    /// Active markers, oldest first; expired entries purged on lookup.
    pub fn markers(&mut self, now_ms: i64) -> impl Iterator<Item = &PatternMarker> {
        self.purge(now_ms);
        self.markers.iter()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn reset(&mut self) {
        self.markers.clear();
        self.next_id = 0;
        self.last_scan_ms = None;
    }

    fn push_marker(&mut self, marker: PatternMarker) {
        self.next_id += 1;
        self.markers.push_back(marker);
        while self.markers.len() > self.cfg.marker_cap {
            self.markers.pop_front();
        }
    }

    fn bucket_active(&self, key: i64) -> bool {
        self.markers.iter().any(|m| m.bucket_key == Some(key))
    }

    fn purge(&mut self, now_ms: i64) {
        self.markers.retain(|m| m.expires_at_ms > now_ms);
    }
}
