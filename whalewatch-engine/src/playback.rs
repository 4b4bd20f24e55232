//! Event timeline and playback controller.
//!
//! One state-transition function, `MarketState::apply_event`, serves both
//! live and replay. Replay determinism comes from the scrub rule: every
//! seek resets all derived state and re-applies the timeline from the
//! start up to the target virtual time. The controller never reads the
//! wall clock; callers pass `now_ms` into every operation.

use crate::config::EngineConfig;
use crate::event::{DomainEvent, ReplayBatch};
use crate::state::MarketState;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Live,
    Replay,
}

/// Replay lifecycle. Live mode stays `Playing`-equivalent and never
/// reaches `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Ready,
    Playing,
    Paused,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Epoch milliseconds; the authoritative replay ordering key.
    pub ts_ms: i64,
    pub event: DomainEvent,
}

/// Materialized, sorted replay timeline. Never mutated after load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    /// Build a timeline from a bulk store response. Records that fail to
    /// parse are dropped and logged; the batch is not assumed sorted.
    pub fn from_batch(batch: ReplayBatch) -> Self {
        let mut entries: Vec<TimelineEntry> = batch
            .events
            .into_iter()
            .filter_map(|record| {
                let ts_ms = record.ts;
                match record.into_event() {
                    Ok(event) => Some(TimelineEntry { ts_ms, event }),
                    Err(err) => {
                        warn!(%err, "dropping unparsable replay record");
                        None
                    }
                }
            })
            .collect();
        entries.sort_by_key(|e| e.ts_ms);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn start_ts_ms(&self) -> i64 {
        self.entries.first().map(|e| e.ts_ms).unwrap_or(0)
    }

    pub fn duration_ms(&self) -> i64 {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => last.ts_ms - first.ts_ms,
            _ => 0,
        }
    }
}

/// Drives `MarketState` from either a live feed or a loaded timeline.
#[derive(Debug)]
pub struct PlaybackController {
    state: MarketState,
    mode: PlaybackMode,
    status: PlaybackStatus,
    timeline: Timeline,
    cursor: usize,
    virtual_elapsed_ms: i64,
    play_origin_ms: i64,
    speed_multiplier: f64,
    live_buffer: VecDeque<TimelineEntry>,
    live_buffer_cap: usize,
}

impl PlaybackController {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            speed_multiplier: cfg.speed_multiplier,
            live_buffer_cap: cfg.live_buffer,
            state: MarketState::new(cfg),
            mode: PlaybackMode::Live,
            status: PlaybackStatus::Idle,
            timeline: Timeline::default(),
            cursor: 0,
            virtual_elapsed_ms: 0,
            play_origin_ms: 0,
            live_buffer: VecDeque::new(),
        }
    }

    /// Load a replay timeline, resetting all derived state. An empty
    /// timeline leaves the controller `Idle` with zero duration.
    pub fn load(&mut self, timeline: Timeline) {
        self.state.reset();
        self.cursor = 0;
        self.virtual_elapsed_ms = 0;
        self.live_buffer.clear();
        self.mode = PlaybackMode::Replay;
        if timeline.is_empty() {
            self.timeline = Timeline::default();
            self.status = PlaybackStatus::Idle;
        } else {
            debug!(
                events = timeline.len(),
                duration_ms = timeline.duration_ms(),
                "timeline loaded"
            );
            self.timeline = timeline;
            self.status = PlaybackStatus::Ready;
        }
    }

    /// Switch to live mode, discarding any replay session.
    pub fn go_live(&mut self) {
        self.state.reset();
        self.timeline = Timeline::default();
        self.cursor = 0;
        self.virtual_elapsed_ms = 0;
        self.live_buffer.clear();
        self.mode = PlaybackMode::Live;
        self.status = PlaybackStatus::Playing;
    }

    pub fn play(&mut self, now_ms: i64) {
        if self.mode != PlaybackMode::Replay {
            return;
        }
        if matches!(self.status, PlaybackStatus::Ready | PlaybackStatus::Paused) {
            self.play_origin_ms = now_ms - ms_real(self.virtual_elapsed_ms, self.speed_multiplier);
            self.status = PlaybackStatus::Playing;
        }
    }

    pub fn pause(&mut self, now_ms: i64) {
        if self.status == PlaybackStatus::Playing && self.mode == PlaybackMode::Replay {
            self.virtual_elapsed_ms = self.virtual_elapsed(now_ms);
            self.status = PlaybackStatus::Paused;
        }
    }

    pub fn toggle(&mut self, now_ms: i64) {
        match self.status {
            PlaybackStatus::Playing => self.pause(now_ms),
            PlaybackStatus::Ready | PlaybackStatus::Paused => self.play(now_ms),
            _ => {}
        }
    }

    /// Advance one frame: in replay, apply every event whose offset has
    /// been reached by the virtual clock, then tick time-driven state.
    pub fn tick(&mut self, now_ms: i64) {
        match self.mode {
            PlaybackMode::Live => {
                self.state.tick(now_ms);
            }
            PlaybackMode::Replay => {
                if self.status != PlaybackStatus::Playing {
                    return;
                }
                self.virtual_elapsed_ms = self.virtual_elapsed(now_ms);
                let virtual_now = self.timeline.start_ts_ms() + self.virtual_elapsed_ms;
                self.apply_through(self.virtual_elapsed_ms, virtual_now);
                self.state.tick(virtual_now);
                if self.virtual_elapsed_ms >= self.timeline.duration_ms() {
                    self.status = PlaybackStatus::Complete;
                }
            }
        }
    }

    /// Seek to `progress` in [0, 1]: full reset, replay from the start up
    /// to the target virtual time. A zero-duration timeline is a no-op.
    pub fn scrub(&mut self, progress: f64, now_ms: i64) {
        if self.mode != PlaybackMode::Replay || self.timeline.duration_ms() <= 0 {
            return;
        }
        let was_playing = self.status == PlaybackStatus::Playing;
        let target_ms =
            (progress.clamp(0.0, 1.0) * self.timeline.duration_ms() as f64).round() as i64;

        self.state.reset();
        self.cursor = 0;
        self.virtual_elapsed_ms = target_ms;
        let virtual_now = self.timeline.start_ts_ms() + target_ms;
        self.apply_through(target_ms, virtual_now);
        self.state.tick(virtual_now);

        if was_playing {
            self.play_origin_ms = now_ms - ms_real(target_ms, self.speed_multiplier);
            self.status = PlaybackStatus::Playing;
        } else {
            self.status = PlaybackStatus::Paused;
        }
    }

    /// Seek by a signed fraction of the timeline from the current position.
    pub fn scrub_by(&mut self, delta: f64, now_ms: i64) {
        self.scrub(self.progress() + delta, now_ms);
    }

    /// Apply a live event exactly once and buffer it for local scrub-back.
    pub fn apply_live(&mut self, event: DomainEvent, now_ms: i64) {
        if self.mode != PlaybackMode::Live {
            return;
        }
        self.status = PlaybackStatus::Playing;
        self.state.apply_event(&event, now_ms);
        let ts_ms = event.timestamp_ms().unwrap_or(now_ms);
        if self.live_buffer.len() >= self.live_buffer_cap {
            self.live_buffer.pop_front();
        }
        self.live_buffer.push_back(TimelineEntry { ts_ms, event });
    }

    /// Freeze the buffered live session into a replay timeline.
    pub fn replay_live_buffer(&mut self) {
        let mut entries: Vec<TimelineEntry> = self.live_buffer.drain(..).collect();
        entries.sort_by_key(|e| e.ts_ms);
        self.load(Timeline { entries });
    }

    pub fn progress(&self) -> f64 {
        let duration = self.timeline.duration_ms();
        if duration <= 0 {
            return 0.0;
        }
        (self.virtual_elapsed_ms as f64 / duration as f64).clamp(0.0, 1.0)
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.speed_multiplier
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MarketState {
        &mut self.state
    }

    fn virtual_elapsed(&self, now_ms: i64) -> i64 {
        (((now_ms - self.play_origin_ms) as f64) * self.speed_multiplier).round() as i64
    }

    fn apply_through(&mut self, target_offset_ms: i64, virtual_now_ms: i64) {
        let start = self.timeline.start_ts_ms();
        while let Some(entry) = self.timeline.entries.get(self.cursor) {
            if entry.ts_ms - start > target_offset_ms {
                break;
            }
            self.state.apply_event(&entry.event, virtual_now_ms);
            self.cursor += 1;
        }
    }
}

fn ms_real(virtual_ms: i64, speed: f64) -> i64 {
    (virtual_ms as f64 / speed).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ReplayRecord, Trade};
    use chrono::DateTime;
    use serde_json::json;

    fn trade_entry(id: i64, ts_ms: i64, value: f64) -> TimelineEntry {
        TimelineEntry {
            ts_ms,
            event: DomainEvent::Trade(Trade {
                trade_id: id,
                timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap(),
                price: 65_000.0,
                quantity: value / 65_000.0,
                trade_value: value,
                is_buy: true,
            }),
        }
    }

    fn timeline(entries: Vec<TimelineEntry>) -> Timeline {
        Timeline { entries }
    }

    fn controller() -> PlaybackController {
        PlaybackController::new(EngineConfig::default())
    }

    #[test]
    fn test_batch_sorted_and_bad_records_dropped() {
        let batch = ReplayBatch {
            events: vec![
                ReplayRecord {
                    ts: 2_000,
                    kind: "trade".into(),
                    data: json!({
                        "trade_id": 2, "timestamp": "2025-03-01T12:00:02Z",
                        "price": 100.0, "quantity": 1.0, "trade_value": 100.0,
                        "is_buy": true
                    }),
                },
                ReplayRecord {
                    ts: 1_000,
                    kind: "trade".into(),
                    data: json!({"trade_id": 1, "timestamp": "garbage"}),
                },
                ReplayRecord {
                    ts: 500,
                    kind: "trade".into(),
                    data: json!({
                        "trade_id": 0, "timestamp": "2025-03-01T12:00:00Z",
                        "price": 100.0, "quantity": 1.0, "trade_value": 100.0,
                        "is_buy": false
                    }),
                },
            ],
        };
        let timeline = Timeline::from_batch(batch);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.start_ts_ms(), 500);
        assert_eq!(timeline.duration_ms(), 1_500);
    }

    #[test]
    fn test_empty_timeline_stays_idle() {
        let mut pc = controller();
        pc.load(Timeline::default());
        assert_eq!(pc.status(), PlaybackStatus::Idle);
        assert_eq!(pc.progress(), 0.0);
        // Zero-duration scrub is a no-op.
        pc.scrub(0.5, 0);
        assert_eq!(pc.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_state_transitions() {
        let mut pc = controller();
        pc.load(timeline(vec![
            trade_entry(1, 0, 1_000.0),
            trade_entry(2, 10_000, 1_000.0),
        ]));
        assert_eq!(pc.status(), PlaybackStatus::Ready);

        pc.play(0);
        assert_eq!(pc.status(), PlaybackStatus::Playing);
        pc.pause(100);
        assert_eq!(pc.status(), PlaybackStatus::Paused);
        pc.play(200);
        assert_eq!(pc.status(), PlaybackStatus::Playing);

        // 10s of virtual time needs 1s of real time at 10x.
        pc.tick(200 + 1_000);
        assert_eq!(pc.status(), PlaybackStatus::Complete);
        assert_eq!(pc.progress(), 1.0);
        assert_eq!(pc.state().entity_count(), 2);
    }

    #[test]
    fn test_events_applied_by_virtual_clock() {
        let mut pc = controller();
        pc.load(timeline(vec![
            trade_entry(1, 0, 1_000.0),
            trade_entry(2, 5_000, 1_000.0),
            trade_entry(3, 10_000, 1_000.0),
        ]));
        pc.play(0);

        // 100ms real = 1s virtual: only the first event.
        pc.tick(100);
        assert_eq!(pc.state().entity_count(), 1);
        assert_eq!(pc.status(), PlaybackStatus::Playing);

        // 600ms real = 6s virtual: second event reached.
        pc.tick(600);
        assert_eq!(pc.state().entity_count(), 2);
        assert!((pc.progress() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_pause_freezes_virtual_clock() {
        let mut pc = controller();
        pc.load(timeline(vec![
            trade_entry(1, 0, 1_000.0),
            trade_entry(2, 10_000, 1_000.0),
        ]));
        pc.play(0);
        pc.tick(100);
        pc.pause(100);
        let progress = pc.progress();
        pc.tick(50_000);
        assert_eq!(pc.progress(), progress);
        assert_eq!(pc.state().entity_count(), 1);
    }

    #[test]
    fn test_scrub_resets_and_replays_to_target() {
        let mut pc = controller();
        pc.load(timeline(vec![
            trade_entry(1, 0, 1_000.0),
            trade_entry(2, 4_000, 1_000.0),
            trade_entry(3, 8_000, 1_000.0),
            trade_entry(4, 10_000, 1_000.0),
        ]));
        pc.scrub(0.5, 0);
        assert_eq!(pc.status(), PlaybackStatus::Paused);
        // Target 5s: events at 0 and 4s applied.
        assert_eq!(pc.state().entity_count(), 2);
        assert!((pc.progress() - 0.5).abs() < 1e-9);

        // Scrub back: earlier state reproduced from scratch.
        pc.scrub(0.1, 0);
        assert_eq!(pc.state().entity_count(), 1);
    }

    #[test]
    fn test_scrub_while_playing_continues_smoothly() {
        let mut pc = controller();
        pc.load(timeline(vec![
            trade_entry(1, 0, 1_000.0),
            trade_entry(2, 10_000, 1_000.0),
        ]));
        pc.play(0);
        pc.scrub(0.5, 1_000);
        assert_eq!(pc.status(), PlaybackStatus::Playing);
        // Another 500ms real = 5s virtual: reaches the end.
        pc.tick(1_500);
        assert_eq!(pc.status(), PlaybackStatus::Complete);
    }

    #[test]
    fn test_scrub_history_independence() {
        let entries = vec![
            trade_entry(1, 0, 700_000.0),
            trade_entry(2, 2_000, 1_000.0),
            trade_entry(3, 60_000, 1_000.0),
            trade_entry(4, 100_000, 800_000.0),
        ];

        // Messy session: play, tick around, scrub forward then back.
        let mut messy = controller();
        messy.load(timeline(entries.clone()));
        messy.play(0);
        messy.tick(3_000);
        messy.pause(3_500);
        messy.scrub(0.9, 4_000);
        messy.scrub(0.2, 5_000);

        // Clean session: load fresh, scrub straight to 0.2.
        let mut clean = controller();
        clean.load(timeline(entries));
        clean.scrub(0.2, 0);

        let messy_ids: Vec<i64> = messy.state().entities().map(|e| e.id).collect();
        let clean_ids: Vec<i64> = clean.state().entities().map(|e| e.id).collect();
        assert_eq!(messy_ids, clean_ids);
        assert_eq!(
            messy.state().recent_trades().count(),
            clean.state().recent_trades().count()
        );
        assert_eq!(messy.progress(), clean.progress());
        assert_eq!(messy.state().bid_walls(), clean.state().bid_walls());
    }

    #[test]
    fn test_stale_events_skipped_on_scrub_catch_up() {
        // Entity lifespan is 60s; scrubbing to the end means the first
        // trade is 100s old and must not spawn.
        let mut pc = controller();
        pc.load(timeline(vec![
            trade_entry(1, 0, 1_000.0),
            trade_entry(2, 100_000, 1_000.0),
        ]));
        pc.scrub(1.0, 0);
        let ids: Vec<i64> = pc.state().entities().map(|e| e.id).collect();
        assert_eq!(ids, vec![2]);
        // The tape still retains both trades.
        assert_eq!(pc.state().recent_trades().count(), 2);
    }

    #[test]
    fn test_live_mode_applies_and_buffers() {
        let mut pc = controller();
        pc.go_live();
        for i in 0..3 {
            pc.apply_live(trade_entry(i, i * 1_000, 1_000.0).event, i * 1_000);
        }
        assert_eq!(pc.state().entity_count(), 3);
        assert_eq!(pc.live_buffer.len(), 3);
        assert_eq!(pc.status(), PlaybackStatus::Playing);

        // Live mode ignores replay controls.
        pc.pause(5_000);
        assert_eq!(pc.status(), PlaybackStatus::Playing);
        pc.scrub(0.5, 5_000);
        assert_eq!(pc.state().entity_count(), 3);
    }

    #[test]
    fn test_live_buffer_bounded() {
        let cfg = EngineConfig {
            live_buffer: 10,
            ..EngineConfig::default()
        };
        let mut pc = PlaybackController::new(cfg);
        pc.go_live();
        for i in 0..25 {
            pc.apply_live(trade_entry(i, i * 10, 1_000.0).event, i * 10);
        }
        assert_eq!(pc.live_buffer.len(), 10);
        assert_eq!(pc.live_buffer.front().unwrap().ts_ms, 150);
    }

    #[test]
    fn test_replay_live_buffer_enters_replay() {
        let mut pc = controller();
        pc.go_live();
        pc.apply_live(trade_entry(1, 0, 1_000.0).event, 0);
        pc.apply_live(trade_entry(2, 10_000, 1_000.0).event, 10_000);
        pc.replay_live_buffer();
        assert_eq!(pc.mode(), PlaybackMode::Replay);
        assert_eq!(pc.status(), PlaybackStatus::Ready);
        assert_eq!(pc.timeline().duration_ms(), 10_000);
        // Derived live state was reset on entry.
        assert_eq!(pc.state().entity_count(), 0);
    }
}
