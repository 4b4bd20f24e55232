//! Order-book wall and anomaly analyzer.
//!
//! Consumes depth snapshots, maintains an hour-bounded per-bucket quantity
//! history, and derives wall candidates with z-score anomaly intensities,
//! level-change flashes, whale ripples, and depth imbalance. An empty or
//! one-sided snapshot yields a valid zero state (mid price 0), never an
//! error; consumers treat mid price 0 as "unknown".

use crate::config::EngineConfig;
use crate::event::OrderBookSnapshot;
use crate::scoring::clamp01;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookSide {
    Bid,
    Ask,
}

/// A price bucket holding concentrated resting size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallBucket {
    pub side: BookSide,
    pub price: f64,
    pub quantity: f64,
    /// Anomaly intensity, 0..1 (z-score over the bucket's history, /3).
    pub intensity: f64,
    /// Flagged when intensity crosses the configured threshold.
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashDirection {
    Up,
    Down,
}

/// Transient marker for a level whose quantity just changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flash {
    pub side: BookSide,
    pub price: f64,
    pub direction: FlashDirection,
    pub expires_at_ms: i64,
}

/// Transient ripple registered at a whale print's price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ripple {
    pub price: f64,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Bucket key: side plus the rounded multiple of the bucket size.
type BucketKey = (BookSide, i64);
/// Level key for flash detection: side plus price rounded to cents.
type LevelKey = (BookSide, i64);

#[derive(Debug, Clone)]
struct HistoryEntry {
    ts_ms: i64,
    buckets: HashMap<BucketKey, f64>,
}

/// Rolling order-book state owned by the analyzer.
#[derive(Debug, Clone)]
pub struct BookAnalyzer {
    cfg: EngineConfig,
    mid_price: f64,
    bucket_size_usd: f64,
    imbalance: f64,
    bid_walls: Vec<WallBucket>,
    ask_walls: Vec<WallBucket>,
    history: VecDeque<HistoryEntry>,
    prev_levels: Option<HashMap<LevelKey, f64>>,
    flashes: HashMap<LevelKey, Flash>,
    ripples: VecDeque<Ripple>,
}

impl BookAnalyzer {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            mid_price: 0.0,
            bucket_size_usd: 0.0,
            imbalance: 0.0,
            bid_walls: Vec::new(),
            ask_walls: Vec::new(),
            history: VecDeque::new(),
            prev_levels: None,
            flashes: HashMap::new(),
            ripples: VecDeque::new(),
        }
    }

    /// Apply a depth snapshot, recomputing walls, intensities, and flashes.
    pub fn apply_snapshot(&mut self, snapshot: &OrderBookSnapshot, now_ms: i64) {
        let best_bid = snapshot
            .bids
            .iter()
            .map(|l| l.price)
            .fold(f64::NAN, f64::max);
        let best_ask = snapshot
            .asks
            .iter()
            .map(|l| l.price)
            .fold(f64::NAN, f64::min);

        self.mid_price = if best_bid.is_finite() && best_ask.is_finite() {
            (best_bid + best_ask) / 2.0
        } else {
            0.0
        };
        self.bucket_size_usd = (self.mid_price * self.cfg.bucket_fraction)
            .round()
            .max(self.cfg.bucket_floor_usd);

        // Top-N levels per side: bids descending, asks ascending by price.
        let mut bids = snapshot.bids.clone();
        bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
        bids.truncate(self.cfg.book_top_levels);
        let mut asks = snapshot.asks.clone();
        asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        asks.truncate(self.cfg.book_top_levels);

        let mut buckets: HashMap<BucketKey, f64> = HashMap::new();
        for level in &bids {
            *buckets
                .entry((BookSide::Bid, self.bucket_key(level.price)))
                .or_insert(0.0) += level.amount;
        }
        for level in &asks {
            *buckets
                .entry((BookSide::Ask, self.bucket_key(level.price)))
                .or_insert(0.0) += level.amount;
        }

        // History append, then eviction by age relative to this snapshot.
        self.history.push_back(HistoryEntry {
            ts_ms: now_ms,
            buckets: buckets.clone(),
        });
        let horizon = now_ms - self.cfg.book_history_ms;
        while self.history.front().is_some_and(|e| e.ts_ms < horizon) {
            self.history.pop_front();
        }

        self.bid_walls = self.build_walls(BookSide::Bid, &buckets);
        self.ask_walls = self.build_walls(BookSide::Ask, &buckets);

        self.detect_flashes(&bids, &asks, now_ms);

        let bid_depth: f64 = snapshot.bids.iter().map(|l| l.amount).sum();
        let ask_depth: f64 = snapshot.asks.iter().map(|l| l.amount).sum();
        self.imbalance = (bid_depth - ask_depth) / (bid_depth + ask_depth).max(1.0);
    }

    /// Register a whale ripple at the print's price.
    pub fn register_ripple(&mut self, price: f64, now_ms: i64) {
        self.purge_ripples(now_ms);
        self.ripples.push_back(Ripple {
            price,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + self.cfg.ripple_ttl_ms,
        });
        while self.ripples.len() > self.cfg.ripple_cap {
            self.ripples.pop_front();
        }
    }

    /// Remaining strength (1 fading to 0) of the strongest active ripple
    /// within the configured price tolerance of a book row.
    pub fn ripple_at(&self, row_price: f64, now_ms: i64) -> Option<f64> {
        let tolerance = row_price.abs() * self.cfg.ripple_price_tolerance;
        self.ripples
            .iter()
            .filter(|r| r.expires_at_ms > now_ms && (r.price - row_price).abs() <= tolerance)
            .map(|r| {
                (r.expires_at_ms - now_ms) as f64 / (r.expires_at_ms - r.created_at_ms).max(1) as f64
            })
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))))
    }

    pub fn mid_price(&self) -> f64 {
        self.mid_price
    }

    pub fn bucket_size_usd(&self) -> f64 {
        self.bucket_size_usd
    }

    /// Depth imbalance in [-1, 1]; 1 only when ask depth is zero.
    pub fn imbalance(&self) -> f64 {
        self.imbalance
    }

    pub fn bid_walls(&self) -> &[WallBucket] {
        &self.bid_walls
    }

    pub fn ask_walls(&self) -> &[WallBucket] {
        &self.ask_walls
    }

    /// Active flashes; expired entries are purged on lookup.
    pub fn flashes(&mut self, now_ms: i64) -> Vec<Flash> {
        self.flashes.retain(|_, f| f.expires_at_ms > now_ms);
        let mut out: Vec<Flash> = self.flashes.values().copied().collect();
        out.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    /// Active ripples, oldest first.
    pub fn ripples(&mut self, now_ms: i64) -> Vec<Ripple> {
        self.purge_ripples(now_ms);
        self.ripples.iter().copied().collect()
    }

    pub fn reset(&mut self) {
        self.mid_price = 0.0;
        self.bucket_size_usd = 0.0;
        self.imbalance = 0.0;
        self.bid_walls.clear();
        self.ask_walls.clear();
        self.history.clear();
        self.prev_levels = None;
        self.flashes.clear();
        self.ripples.clear();
    }

    fn bucket_key(&self, price: f64) -> i64 {
        (price / self.bucket_size_usd).round() as i64
    }

    fn build_walls(&self, side: BookSide, buckets: &HashMap<BucketKey, f64>) -> Vec<WallBucket> {
        let mut candidates: Vec<(i64, f64)> = buckets
            .iter()
            .filter(|((s, _), _)| *s == side)
            .map(|((_, key), qty)| (*key, *qty))
            .collect();
        // Largest size first; price as a deterministic tie-break.
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(self.cfg.wall_candidates);

        candidates
            .into_iter()
            .map(|(key, quantity)| {
                let intensity = self.bucket_intensity(side, key, quantity);
                WallBucket {
                    side,
                    price: key as f64 * self.bucket_size_usd,
                    quantity,
                    intensity,
                    confirmed: intensity >= self.cfg.wall_intensity_threshold,
                }
            })
            .collect()
    }

    /// Population z-score of the bucket's current quantity over its history,
    /// compressed to 0..1. Fewer than two samples, or zero variance, means no
    /// anomaly can be claimed.
    fn bucket_intensity(&self, side: BookSide, key: i64, current_qty: f64) -> f64 {
        let samples: Vec<f64> = self
            .history
            .iter()
            .filter_map(|e| e.buckets.get(&(side, key)).copied())
            .collect();
        if samples.len() < 2 {
            return 0.0;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|q| (q - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        if std <= 0.0 {
            return 0.0;
        }

        clamp01((current_qty - mean) / std / 3.0)
    }

    fn detect_flashes(
        &mut self,
        bids: &[crate::event::BookLevel],
        asks: &[crate::event::BookLevel],
        now_ms: i64,
    ) {
        let mut current: HashMap<LevelKey, f64> = HashMap::new();
        for level in bids {
            current.insert((BookSide::Bid, level_key(level.price)), level.amount);
        }
        for level in asks {
            current.insert((BookSide::Ask, level_key(level.price)), level.amount);
        }

        if let Some(prev) = &self.prev_levels {
            // Union of prior and current keys: a vanished level reads as
            // quantity zero and flashes down, symmetric with new levels
            // flashing up.
            let keys = current
                .keys()
                .chain(prev.keys().filter(|k| !current.contains_key(*k)));
            for key in keys {
                let qty = current.get(key).copied().unwrap_or(0.0);
                let prior = prev.get(key).copied().unwrap_or(0.0);
                if (qty - prior).abs() > f64::EPSILON {
                    let direction = if qty > prior {
                        FlashDirection::Up
                    } else {
                        FlashDirection::Down
                    };
                    self.flashes.insert(
                        *key,
                        Flash {
                            side: key.0,
                            price: key.1 as f64 / 100.0,
                            direction,
                            expires_at_ms: now_ms + self.cfg.flash_ttl_ms,
                        },
                    );
                }
            }
        }

        self.flashes.retain(|_, f| f.expires_at_ms > now_ms);
        self.prev_levels = Some(current);
    }

    fn purge_ripples(&mut self, now_ms: i64) {
        while self.ripples.front().is_some_and(|r| r.expires_at_ms <= now_ms) {
            self.ripples.pop_front();
        }
    }
}

fn level_key(price: f64) -> i64 {
    (price * 100.0).round() as i64
}
