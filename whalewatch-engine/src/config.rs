//! Engine configuration.
//!
//! Every tunable has a compiled default and an environment variable override,
//! but the parsed values live in an owned `EngineConfig` that is injected into
//! each manager. No globals, so parallel test instances and deterministic
//! replay-from-scratch stay independent.

/// Whale notional threshold in USD (env: WHALE_THRESHOLD).
const WHALE_THRESHOLD: f64 = 500_000.0;
/// Trade value at which the whale magnitude score saturates (env: WHALE_SCORE_CAP).
const WHALE_SCORE_CAP: f64 = 5_000_000.0;
/// Fixed entity lifespan in milliseconds.
const ENTITY_LIFESPAN_MS: i64 = 60_000;
/// Entity pool capacity; oldest-created evicted first on overflow.
const ENTITY_CAPACITY: usize = 420;
/// Rolling trade window used for the size-score average.
const ROLLING_AVG_WINDOW: usize = 200;
/// Retained trade buffer for mode re-hydration and pattern scans.
const TRADE_BUFFER: usize = 200;
/// Retained whale alert buffer.
const ALERT_BUFFER: usize = 100;
/// Order-book level history horizon in milliseconds (1 hour).
const BOOK_HISTORY_MS: i64 = 60 * 60 * 1000;
/// Level flash lifetime.
const FLASH_TTL_MS: i64 = 900;
/// Whale ripple lifetime.
const RIPPLE_TTL_MS: i64 = 2_000;
/// Maximum retained ripples.
const RIPPLE_CAP: usize = 20;
/// Ripple-to-row price tolerance (fraction of price).
const RIPPLE_PRICE_TOLERANCE: f64 = 0.0006;
/// Intensity above which a wall bucket is flagged confirmed (z >= ~1.05).
const WALL_INTENSITY_THRESHOLD: f64 = 0.35;
/// Bucket size as a fraction of mid price, floored at BUCKET_FLOOR_USD.
const BUCKET_FRACTION: f64 = 0.001;
const BUCKET_FLOOR_USD: f64 = 10.0;
/// Book levels bucketised per side.
const BOOK_TOP_LEVELS: usize = 12;
/// Wall candidates kept per side.
const WALL_CANDIDATES: usize = 3;
/// Pattern marker lifetime and cap.
const MARKER_TTL_MS: i64 = 5_000;
const MARKER_CAP: usize = 6;
/// Minimum same-side trades in a bucket to emit a marker.
const MARKER_MIN_TRADES: usize = 3;
/// Price move (percent) separating holding patterns from directional ones.
const MARKER_MOVE_PCT: f64 = 0.4;
/// Trade window scanned for pattern markers.
const MARKER_WINDOW_MS: i64 = 15_000;
/// Replay virtual-clock speed multiplier.
const SPEED_MULTIPLIER: f64 = 10.0;
/// Bounded live timeline buffer for local scrub-back.
const LIVE_BUFFER: usize = 5_000;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Owned configuration injected into every manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub whale_threshold: f64,
    pub whale_score_cap: f64,
    pub entity_lifespan_ms: i64,
    pub entity_capacity: usize,
    pub rolling_avg_window: usize,
    pub trade_buffer: usize,
    pub alert_buffer: usize,
    pub book_history_ms: i64,
    pub flash_ttl_ms: i64,
    pub ripple_ttl_ms: i64,
    pub ripple_cap: usize,
    pub ripple_price_tolerance: f64,
    pub wall_intensity_threshold: f64,
    pub bucket_fraction: f64,
    pub bucket_floor_usd: f64,
    pub book_top_levels: usize,
    pub wall_candidates: usize,
    pub marker_ttl_ms: i64,
    pub marker_cap: usize,
    pub marker_min_trades: usize,
    pub marker_move_pct: f64,
    pub marker_window_ms: i64,
    pub speed_multiplier: f64,
    pub live_buffer: usize,
    /// Scale applied to fractional distance from mid price on the price axis.
    pub position_scale: f64,
    /// Clamp range of the price axis, in scene units.
    pub position_range: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            whale_threshold: WHALE_THRESHOLD,
            whale_score_cap: WHALE_SCORE_CAP,
            entity_lifespan_ms: ENTITY_LIFESPAN_MS,
            entity_capacity: ENTITY_CAPACITY,
            rolling_avg_window: ROLLING_AVG_WINDOW,
            trade_buffer: TRADE_BUFFER,
            alert_buffer: ALERT_BUFFER,
            book_history_ms: BOOK_HISTORY_MS,
            flash_ttl_ms: FLASH_TTL_MS,
            ripple_ttl_ms: RIPPLE_TTL_MS,
            ripple_cap: RIPPLE_CAP,
            ripple_price_tolerance: RIPPLE_PRICE_TOLERANCE,
            wall_intensity_threshold: WALL_INTENSITY_THRESHOLD,
            bucket_fraction: BUCKET_FRACTION,
            bucket_floor_usd: BUCKET_FLOOR_USD,
            book_top_levels: BOOK_TOP_LEVELS,
            wall_candidates: WALL_CANDIDATES,
            marker_ttl_ms: MARKER_TTL_MS,
            marker_cap: MARKER_CAP,
            marker_min_trades: MARKER_MIN_TRADES,
            marker_move_pct: MARKER_MOVE_PCT,
            marker_window_ms: MARKER_WINDOW_MS,
            speed_multiplier: SPEED_MULTIPLIER,
            live_buffer: LIVE_BUFFER,
            position_scale: 800.0,
            position_range: 5.0,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            whale_threshold: env_f64("WHALE_THRESHOLD", default.whale_threshold),
            whale_score_cap: env_f64("WHALE_SCORE_CAP", default.whale_score_cap),
            entity_capacity: env_usize("ENTITY_CAPACITY", default.entity_capacity),
            speed_multiplier: env_f64("REPLAY_SPEED", default.speed_multiplier),
            marker_move_pct: env_f64("MARKER_MOVE_PCT", default.marker_move_pct),
            ..default
        }
    }
}
