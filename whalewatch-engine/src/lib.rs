/// Whale Watch - Market Micro-Event Reconstruction Engine
///
/// This library reconstructs a visual market scene from a stream of market
/// micro-events (trades, whale alerts, order-book snapshots, institutional
/// execution signals), consumed either live or from a recorded timeline:
/// - Feature scorer: per-trade aggression from size and arrival speed
/// - Whale detector: threshold alerts, similar patterns, bull/bear power
/// - Order-book analyzer: wall candidates with anomaly intensities
/// - Entity manager: bounded pool of fading, drifting bubble entities
/// - Playback controller: live apply or deterministic replay with scrubbing
///
/// The engine is synchronous and deterministic: no I/O, no wall clock. All
/// time is injected as `now_ms`, so a reset-and-replay reproduces the same
/// derived state.
pub mod book;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod markers;
pub mod playback;
pub mod scoring;
pub mod state;
pub mod whale;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use error::EngineError;

pub use event::{
    BookLevel, DomainEvent, InstitutionalFeatures, InstitutionalSignal, OrderBookSnapshot,
    ReplayBatch, ReplayRecord, Side, SimilarPattern, Trade, WhaleAlert,
};

pub use book::{BookSide, Flash, FlashDirection, Ripple, WallBucket};
pub use entity::{EntityMode, TradeLike, Trail, Vec3, VisualEntity};
pub use markers::{MarkerKind, PatternMarker};
pub use playback::{PlaybackController, PlaybackMode, PlaybackStatus, Timeline, TimelineEntry};
pub use scoring::{FeatureScore, FeatureScorer};
pub use state::{HypeReality, MarketState, WhaleActivity};
pub use whale::{BullBearPower, TradeSeen};
