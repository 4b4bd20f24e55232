//! Market state and the single event dispatcher.
//!
//! `MarketState` owns every derived structure (scorer, whale tape, book
//! analyzer, entity pool, marker scanner) and exposes the one
//! `apply_event` used by both live and replay paths. It never reads the
//! wall clock; all time flows in as `now_ms`, which is arrival time when
//! live and virtual time when replaying. `reset()` plus a replay of the
//! same events reproduces identical derived state.

use crate::book::{BookAnalyzer, Flash, Ripple, WallBucket};
use crate::config::EngineConfig;
use crate::entity::{EntityManager, EntityMode, TradeLike, VisualEntity};
use crate::event::{DomainEvent, Trade, WhaleAlert};
use crate::markers::{PatternMarker, PatternScanner};
use crate::scoring::{clamp01, FeatureScorer};
use crate::whale::{self, BullBearPower, TradeSeen};
use std::collections::VecDeque;
use tracing::debug;

/// Window for the aggregate whale-activity metrics.
const ACTIVITY_WINDOW_MS: i64 = 10 * 60 * 1000;
/// Window for the short-horizon price change.
const PRICE_CHANGE_WINDOW_MS: i64 = 10_000;
/// Whale volume normaliser for the activity score.
const ACTIVITY_VOLUME_UNIT: f64 = 1_000_000.0;
/// Log base for the activity volume term.
const ACTIVITY_LOG_BASE: f64 = 50.0;
/// Price-move multiplier mapping percent change onto a 0..100 score.
const PRICE_SCORE_MULTIPLIER: f64 = 12.0;
/// Gap above which whale flow and price action are called divergent.
const INSIGHT_DIVERGENCE: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
struct ActivitySample {
    ts_ms: i64,
    value: f64,
    is_whale: bool,
}

/// Aggregate whale activity over the rolling 10-minute window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WhaleActivity {
    /// Blended volume/ratio score, 0..100.
    pub score: f64,
    pub whale_value_total: f64,
    pub total_value: f64,
    pub whale_count: usize,
    pub trade_count: usize,
}

/// Whale flow versus price action, with a one-line interpretation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HypeReality {
    pub whale_score: f64,
    pub price_score: f64,
    pub insight: &'static str,
}

/// All derived market state, owned by one logical execution context.
#[derive(Debug)]
pub struct MarketState {
    cfg: EngineConfig,
    scorer: FeatureScorer,
    book: BookAnalyzer,
    entities: EntityManager,
    scanner: PatternScanner,
    recent_trades: VecDeque<TradeSeen>,
    recent_alerts: VecDeque<WhaleAlert>,
    activity: VecDeque<ActivitySample>,
}

impl MarketState {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            scorer: FeatureScorer::new(cfg.rolling_avg_window),
            book: BookAnalyzer::new(cfg.clone()),
            entities: EntityManager::new(cfg.clone()),
            scanner: PatternScanner::new(cfg.clone()),
            recent_trades: VecDeque::with_capacity(cfg.trade_buffer),
            recent_alerts: VecDeque::with_capacity(cfg.alert_buffer),
            activity: VecDeque::new(),
            cfg,
        }
    }

    /// Apply one event. The match is exhaustive; a new event kind is a
    /// compile-time-checked change here.
    pub fn apply_event(&mut self, event: &DomainEvent, now_ms: i64) {
        match event {
            DomainEvent::Trade(trade) => {
                self.ingest_trade(trade, now_ms);
            }
            DomainEvent::WhaleAlert(alert) => {
                // Record the enriched alert first so ingest does not
                // synthesise a bare one for the same id.
                self.record_alert(alert.clone(), now_ms);
                self.ingest_trade(&alert.trade, now_ms);
            }
            DomainEvent::OrderBook(snapshot) => {
                self.book.apply_snapshot(snapshot, now_ms);
                self.entities.set_mid_price(self.book.mid_price());
            }
            DomainEvent::Institutional(signal) => {
                self.scanner.push_signal_marker(
                    &signal.label,
                    self.book.mid_price(),
                    signal.side,
                    now_ms,
                );
            }
        }
    }

    /// Advance time-driven state one frame: entity animation, marker scan,
    /// window pruning.
    pub fn tick(&mut self, now_ms: i64) {
        self.entities.tick(now_ms);
        let tape: Vec<TradeSeen> = self.recent_trades.iter().copied().collect();
        self.scanner.scan(&tape, self.book.bucket_size_usd(), now_ms);
        let horizon = now_ms - ACTIVITY_WINDOW_MS;
        while self.activity.front().is_some_and(|s| s.ts_ms < horizon) {
            self.activity.pop_front();
        }
    }

    /// Return every derived structure to empty, as before any event.
    pub fn reset(&mut self) {
        self.scorer.reset();
        self.book.reset();
        self.entities.reset();
        self.scanner.reset();
        self.recent_trades.clear();
        self.recent_alerts.clear();
        self.activity.clear();
        debug!("market state reset");
    }

    /// Switch the entity view mode, rebuilding the pool from the retained
    /// buffers. The alert buffer outlives the trade tape on a busy feed,
    /// so whales rotated off the tape are merged back in.
    pub fn set_mode(&mut self, mode: EntityMode, now_ms: i64) {
        let mut retained: Vec<TradeLike> = self
            .recent_trades
            .iter()
            .map(|t| TradeLike {
                trade_id: t.id,
                ts_ms: t.ts_ms,
                price: t.price,
                value: t.value,
                is_buy: t.is_buy,
                aggression: t.aggression,
            })
            .collect();
        for alert in &self.recent_alerts {
            if retained.iter().any(|t| t.trade_id == alert.trade.trade_id) {
                continue;
            }
            // Aggression rotated off the tape with the trade; neutral here.
            retained.push(TradeLike {
                trade_id: alert.trade.trade_id,
                ts_ms: alert.trade.timestamp_ms(),
                price: alert.trade.price,
                value: alert.trade.trade_value,
                is_buy: alert.trade.is_buy,
                aggression: 0.0,
            });
        }
        retained.sort_by_key(|t| t.ts_ms);
        self.entities.set_mode(mode, &retained, now_ms);
    }

    fn ingest_trade(&mut self, trade: &Trade, now_ms: i64) {
        // A whale alert repeats its trade's id; the scorer must only see a
        // trade once, so a repeated id reuses the stored score.
        let aggression = match self
            .recent_trades
            .iter()
            .rev()
            .find(|t| t.id == trade.trade_id)
        {
            Some(seen) => seen.aggression,
            None => {
                let score = self.scorer.observe(trade.trade_value, trade.timestamp_ms());
                let seen = TradeSeen {
                    id: trade.trade_id,
                    ts_ms: trade.timestamp_ms(),
                    price: trade.price,
                    value: trade.trade_value,
                    is_buy: trade.is_buy,
                    aggression: score.aggression,
                };
                if self.recent_trades.len() >= self.cfg.trade_buffer {
                    self.recent_trades.pop_front();
                }
                self.recent_trades.push_back(seen);
                self.activity.push_back(ActivitySample {
                    ts_ms: trade.timestamp_ms(),
                    value: trade.trade_value,
                    is_whale: whale::is_whale(trade.trade_value, self.cfg.whale_threshold),
                });
                score.aggression
            }
        };

        self.entities.spawn(
            &TradeLike {
                trade_id: trade.trade_id,
                ts_ms: trade.timestamp_ms(),
                price: trade.price,
                value: trade.trade_value,
                is_buy: trade.is_buy,
                aggression,
            },
            now_ms,
        );

        // A whale-sized plain trade gets a synthesised alert; the enriched
        // kind may still arrive later for the same id and is deduplicated.
        if whale::is_whale(trade.trade_value, self.cfg.whale_threshold)
            && !self.has_alert(trade.trade_id)
        {
            let alert = self.build_alert(trade);
            self.record_alert(alert, now_ms);
        }
    }

    fn build_alert(&self, trade: &Trade) -> WhaleAlert {
        let tape: Vec<TradeSeen> = self.recent_trades.iter().copied().collect();
        let power = whale::bull_bear_power(&tape, self.cfg.whale_threshold);
        WhaleAlert {
            trade: trade.clone(),
            whale_score: whale::whale_score(
                trade.trade_value,
                self.cfg.whale_threshold,
                self.cfg.whale_score_cap,
            ),
            bull_bear_sentiment: power.bull_power,
            similar_patterns: whale::find_similar_patterns(
                trade.trade_value,
                trade.is_buy,
                &tape,
                self.cfg.whale_threshold,
            ),
            severity_score: None,
            price_move_pct: None,
            label: None,
            action_label: None,
        }
    }

    fn has_alert(&self, trade_id: i64) -> bool {
        self.recent_alerts
            .iter()
            .any(|a| a.trade.trade_id == trade_id)
    }

    fn record_alert(&mut self, alert: WhaleAlert, now_ms: i64) {
        if self.has_alert(alert.trade.trade_id) {
            return;
        }
        self.book.register_ripple(alert.trade.price, now_ms);
        if self.recent_alerts.len() >= self.cfg.alert_buffer {
            self.recent_alerts.pop_front();
        }
        debug!(
            trade_id = alert.trade.trade_id,
            value = alert.trade.trade_value,
            "whale alert recorded"
        );
        self.recent_alerts.push_back(alert);
    }

    // Read-only snapshot accessors for the render loop.

    pub fn entities(&self) -> impl Iterator<Item = &VisualEntity> {
        self.entities.entities()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_mode(&self) -> EntityMode {
        self.entities.mode()
    }

    pub fn mid_price(&self) -> f64 {
        self.book.mid_price()
    }

    pub fn imbalance(&self) -> f64 {
        self.book.imbalance()
    }

    pub fn bid_walls(&self) -> &[WallBucket] {
        self.book.bid_walls()
    }

    pub fn ask_walls(&self) -> &[WallBucket] {
        self.book.ask_walls()
    }

    pub fn flashes(&mut self, now_ms: i64) -> Vec<Flash> {
        self.book.flashes(now_ms)
    }

    pub fn ripples(&mut self, now_ms: i64) -> Vec<Ripple> {
        self.book.ripples(now_ms)
    }

    pub fn markers(&mut self, now_ms: i64) -> Vec<PatternMarker> {
        self.scanner.markers(now_ms).cloned().collect()
    }

    pub fn recent_alerts(&self) -> impl DoubleEndedIterator<Item = &WhaleAlert> {
        self.recent_alerts.iter()
    }

    pub fn recent_trades(&self) -> impl DoubleEndedIterator<Item = &TradeSeen> {
        self.recent_trades.iter()
    }

    /// Whale buy/sell pressure over the retained tape.
    pub fn bull_bear(&self) -> BullBearPower {
        let tape: Vec<TradeSeen> = self.recent_trades.iter().copied().collect();
        whale::bull_bear_power(&tape, self.cfg.whale_threshold)
    }

    /// Aggregate whale activity over the last 10 minutes: a log-compressed
    /// total-volume term blended with the whale share of traded value,
    /// 0..100. A heavy tape scores on volume even with no whales in it.
    pub fn whale_activity(&self, now_ms: i64) -> WhaleActivity {
        let horizon = now_ms - ACTIVITY_WINDOW_MS;
        let window = self.activity.iter().filter(|s| s.ts_ms >= horizon);

        let mut whale_value_total = 0.0;
        let mut total_value = 0.0;
        let mut whale_count = 0;
        let mut trade_count = 0;
        for sample in window {
            trade_count += 1;
            total_value += sample.value;
            if sample.is_whale {
                whale_count += 1;
                whale_value_total += sample.value;
            }
        }
        if total_value <= 0.0 {
            return WhaleActivity {
                trade_count,
                whale_count,
                ..WhaleActivity::default()
            };
        }

        let volume_term = clamp01(
            (total_value / ACTIVITY_VOLUME_UNIT).max(1.0).ln() / ACTIVITY_LOG_BASE.ln(),
        );
        let ratio = whale_value_total / total_value.max(1.0);
        let score = ((0.6 * volume_term + 0.4 * ratio) * 100.0).min(100.0);

        WhaleActivity {
            score,
            whale_value_total,
            total_value,
            whale_count,
            trade_count,
        }
    }

    /// Percent price move over trades in the last 10 seconds; `None` with
    /// fewer than two trades in the window.
    pub fn price_change_10s(&self, now_ms: i64) -> Option<f64> {
        let horizon = now_ms - PRICE_CHANGE_WINDOW_MS;
        let mut window = self.recent_trades.iter().filter(|t| t.ts_ms >= horizon);
        let first = window.next()?;
        let last = window.last()?;
        if first.price <= 0.0 {
            return None;
        }
        Some((last.price - first.price) / first.price * 100.0)
    }

    /// Compare whale flow against price action over the short window.
    pub fn hype_reality(&self, now_ms: i64) -> Option<HypeReality> {
        let change = self.price_change_10s(now_ms)?;
        let whale_score = self.whale_activity(now_ms).score;
        let price_score = (change.abs() * PRICE_SCORE_MULTIPLIER).min(100.0);

        let insight = if whale_score > price_score + INSIGHT_DIVERGENCE {
            "heavy whale flow, quiet tape: accumulation or absorption in progress"
        } else if price_score > whale_score + INSIGHT_DIVERGENCE {
            "price moving without whale flow: likely retail-driven momentum"
        } else {
            "whale flow and price action are aligned"
        };

        Some(HypeReality {
            whale_score,
            price_score,
            insight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{OrderBookSnapshot, Side};
    use chrono::DateTime;

    fn trade_event(id: i64, ts_ms: i64, price: f64, value: f64, is_buy: bool) -> DomainEvent {
        DomainEvent::Trade(Trade {
            trade_id: id,
            timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap(),
            price,
            quantity: value / price,
            trade_value: value,
            is_buy,
        })
    }

    fn book_event(bid: (f64, f64), ask: (f64, f64)) -> DomainEvent {
        DomainEvent::OrderBook(OrderBookSnapshot {
            timestamp: None,
            last_update_id: None,
            bids: vec![crate::event::BookLevel {
                price: bid.0,
                amount: bid.1,
            }],
            asks: vec![crate::event::BookLevel {
                price: ask.0,
                amount: ask.1,
            }],
        })
    }

    fn state() -> MarketState {
        MarketState::new(EngineConfig::default())
    }

    #[test]
    fn test_trade_spawns_entity_and_updates_tape() {
        let mut s = state();
        s.apply_event(&trade_event(1, 1_000, 65_000.0, 10_000.0, true), 1_000);
        assert_eq!(s.entity_count(), 1);
        assert_eq!(s.recent_trades().count(), 1);
        assert_eq!(s.recent_alerts().count(), 0);
    }

    #[test]
    fn test_whale_trade_synthesises_alert_and_ripple() {
        let mut s = state();
        s.apply_event(&trade_event(1, 1_000, 65_000.0, 700_000.0, true), 1_000);
        assert_eq!(s.recent_alerts().count(), 1);
        let alert = s.recent_alerts().next().unwrap().clone();
        assert!(alert.whale_score >= 0.1);
        assert_eq!(s.ripples(1_000).len(), 1);
    }

    #[test]
    fn test_whale_alert_for_same_trade_scores_once() {
        let mut s = state();
        let trade = Trade {
            trade_id: 7,
            timestamp: DateTime::from_timestamp_millis(1_000).unwrap(),
            price: 65_000.0,
            quantity: 10.0,
            trade_value: 650_000.0,
            is_buy: true,
        };
        s.apply_event(&DomainEvent::Trade(trade.clone()), 1_000);
        let avg_after_trade = s.recent_trades().count();

        s.apply_event(
            &DomainEvent::WhaleAlert(WhaleAlert {
                trade,
                whale_score: 0.2,
                bull_bear_sentiment: 0.5,
                similar_patterns: vec![],
                severity_score: None,
                price_move_pct: None,
                label: None,
                action_label: None,
            }),
            1_100,
        );
        // Neither the tape nor the entity pool grew, and the enriched
        // alert did not duplicate the synthesised one.
        assert_eq!(s.recent_trades().count(), avg_after_trade);
        assert_eq!(s.entity_count(), 1);
        assert_eq!(s.recent_alerts().count(), 1);
    }

    #[test]
    fn test_order_book_updates_mid_for_positioning() {
        let mut s = state();
        s.apply_event(&book_event((64_990.0, 1.0), (65_010.0, 1.0)), 0);
        assert_eq!(s.mid_price(), 65_000.0);
        // Entities spawned afterwards position off the new mid.
        s.apply_event(&trade_event(1, 0, 66_000.0, 10_000.0, true), 0);
        let e = s.entities().next().unwrap();
        assert!(e.position.y > 0.0);
    }

    #[test]
    fn test_institutional_signal_becomes_marker() {
        let mut s = state();
        s.apply_event(
            &DomainEvent::Institutional(crate::event::InstitutionalSignal {
                symbol: "BTCUSDT".into(),
                side: Side::Sell,
                label: "Iceberg selling".into(),
                score: 80.0,
                confidence: 0.7,
                features: Default::default(),
                ts: DateTime::from_timestamp_millis(1_000).unwrap(),
            }),
            1_000,
        );
        let markers = s.markers(1_000);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].label, "Iceberg selling");
    }

    #[test]
    fn test_reset_returns_to_empty() {
        let mut s = state();
        s.apply_event(&book_event((64_990.0, 1.0), (65_010.0, 1.0)), 0);
        s.apply_event(&trade_event(1, 0, 65_000.0, 700_000.0, true), 0);
        s.tick(100);
        s.reset();
        assert_eq!(s.entity_count(), 0);
        assert_eq!(s.mid_price(), 0.0);
        assert_eq!(s.recent_trades().count(), 0);
        assert_eq!(s.recent_alerts().count(), 0);
        assert!(s.markers(100).is_empty());
    }

    #[test]
    fn test_trade_buffer_bounded() {
        let mut s = state();
        for i in 0..250 {
            s.apply_event(&trade_event(i, i * 10, 65_000.0, 1_000.0, true), i * 10);
        }
        assert_eq!(s.recent_trades().count(), 200);
        // Oldest evicted first.
        assert!(s.recent_trades().next().unwrap().id == 50);
    }

    #[test]
    fn test_whale_activity_score() {
        let mut s = state();
        // One $2M whale among four trades.
        s.apply_event(&trade_event(1, 0, 65_000.0, 1_000.0, true), 0);
        s.apply_event(&trade_event(2, 1_000, 65_000.0, 1_000.0, true), 1_000);
        s.apply_event(&trade_event(3, 2_000, 65_000.0, 1_000.0, false), 2_000);
        s.apply_event(&trade_event(4, 3_000, 65_000.0, 2_000_000.0, true), 3_000);

        let activity = s.whale_activity(3_000);
        assert_eq!(activity.trade_count, 4);
        assert_eq!(activity.whale_count, 1);
        assert_eq!(activity.whale_value_total, 2_000_000.0);
        assert_eq!(activity.total_value, 2_003_000.0);
        // Volume term over the whole tape, ratio by traded value.
        let volume = (2_003_000.0_f64 / 1_000_000.0).ln() / 50.0_f64.ln();
        let ratio = 2_000_000.0 / 2_003_000.0;
        let expected = (0.6 * volume + 0.4 * ratio) * 100.0;
        assert!((activity.score - expected).abs() < 1e-9);
        // A whale dominating the tape lands around the midpoint band.
        assert!(activity.score > 45.0 && activity.score < 60.0);
    }

    #[test]
    fn test_whale_activity_empty_window() {
        let s = state();
        let activity = s.whale_activity(0);
        assert_eq!(activity.score, 0.0);
        assert_eq!(activity.trade_count, 0);
    }

    #[test]
    fn test_whale_activity_scores_volume_without_whales() {
        let mut s = state();
        // $4M of sub-threshold flow: the volume term still registers.
        for i in 0..10 {
            s.apply_event(&trade_event(i, i * 100, 65_000.0, 400_000.0, true), i * 100);
        }
        let activity = s.whale_activity(1_000);
        assert_eq!(activity.whale_count, 0);
        let expected = 0.6 * (4.0_f64.ln() / 50.0_f64.ln()) * 100.0;
        assert!((activity.score - expected).abs() < 1e-9);
        assert!(activity.score > 0.0);
    }

    #[test]
    fn test_price_change_10s() {
        let mut s = state();
        assert!(s.price_change_10s(0).is_none());
        s.apply_event(&trade_event(1, 0, 65_000.0, 1_000.0, true), 0);
        assert!(s.price_change_10s(0).is_none());
        s.apply_event(&trade_event(2, 5_000, 65_650.0, 1_000.0, true), 5_000);
        let change = s.price_change_10s(5_000).unwrap();
        assert!((change - 1.0).abs() < 1e-9);
        // Both trades age out of the 10s window.
        assert!(s.price_change_10s(20_000).is_none());
    }

    #[test]
    fn test_hype_reality_retail_divergence() {
        let mut s = state();
        // Big price move, no whales.
        s.apply_event(&trade_event(1, 0, 65_000.0, 1_000.0, true), 0);
        s.apply_event(&trade_event(2, 1_000, 67_000.0, 1_000.0, true), 1_000);
        let insight = s.hype_reality(1_000).unwrap();
        assert!(insight.price_score > insight.whale_score + 10.0);
        assert!(insight.insight.contains("retail"));
    }

    #[test]
    fn test_bull_bear_over_tape() {
        let mut s = state();
        s.apply_event(&trade_event(1, 0, 65_000.0, 700_000.0, true), 0);
        s.apply_event(&trade_event(2, 1_000, 65_000.0, 700_000.0, true), 1_000);
        let power = s.bull_bear();
        assert_eq!(power.bull_power, 1.0);
        assert_eq!(power.net_buy_volume, 1_400_000.0);
    }

    #[test]
    fn test_mode_switch_keeps_whale_rotated_off_trade_tape() {
        let mut s = state();
        // A whale, then enough small trades to turn the 200-trade tape over.
        s.apply_event(&trade_event(1, 0, 65_000.0, 700_000.0, true), 0);
        for i in 2..=220 {
            s.apply_event(&trade_event(i, i * 100, 65_000.0, 1_000.0, true), i * 100);
        }
        assert!(s.recent_trades().all(|t| t.id != 1));
        assert!(s.recent_alerts().any(|a| a.trade.trade_id == 1));

        // Still within its 60s lifespan: the focus view must keep it.
        s.set_mode(EntityMode::WhalesOnly, 30_000);
        let ids: Vec<i64> = s.entities().map(|e| e.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_mode_switch_rebuilds_from_tape() {
        let mut s = state();
        s.apply_event(&trade_event(1, 0, 65_000.0, 10_000.0, true), 0);
        s.apply_event(&trade_event(2, 0, 65_000.0, 700_000.0, true), 0);
        assert_eq!(s.entity_count(), 2);
        s.set_mode(EntityMode::WhalesOnly, 0);
        assert_eq!(s.entity_count(), 1);
        s.set_mode(EntityMode::AllTrades, 0);
        assert_eq!(s.entity_count(), 2);
    }
}
