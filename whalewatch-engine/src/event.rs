//! Core data types for market events.
//!
//! These types match the JSON message format produced by the upstream feed
//! and the replay store. Field names are normalized; the upstream emits
//! ISO8601 timestamps both with and without an offset suffix, so parsing
//! accepts either and treats naive timestamps as UTC.

use crate::error::EngineError;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (Buy or Sell).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Side {
    #[serde(alias = "BUY", alias = "buy")]
    Buy,
    #[serde(alias = "SELL", alias = "sell")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy { Side::Buy } else { Side::Sell }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Timestamp (de)serialization helpers.
///
/// The feed emits RFC3339 where possible but the legacy path emits naive
/// `datetime.isoformat()` strings with no offset. Both are accepted; naive
/// timestamps are interpreted as UTC.
pub(crate) mod ts {
    use super::*;
    use serde::de::Error as DeError;
    use serde::Deserializer;

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn de<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("unparsable timestamp: {raw}")))
    }

    pub fn de_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unparsable timestamp: {raw}"))),
        }
    }

    /// Institutional signals carry `ts` either as epoch milliseconds or ISO8601.
    pub fn de_flexible<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(i64),
            Iso(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
            Raw::Iso(raw) => {
                parse(&raw).ok_or_else(|| D::Error::custom(format!("unparsable timestamp: {raw}")))
            }
        }
    }
}

/// Price/quantity level of an order-book snapshot, converted from the wire's
/// decimal-string pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub amount: f64,
}

/// Serde for `[["priceStr","qtyStr"], ...]` level arrays. Levels that do not
/// parse to finite numbers are dropped rather than failing the snapshot.
mod levels {
    use super::*;
    use serde::ser::SerializeSeq;
    use serde::{Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<BookLevel>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<(Decimal, Decimal)>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter_map(|(price, amount)| {
                let price = price.to_f64()?;
                let amount = amount.to_f64()?;
                (price.is_finite() && amount.is_finite()).then_some(BookLevel { price, amount })
            })
            .collect())
    }

    pub fn serialize<S>(levels: &[BookLevel], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(levels.len()))?;
        for level in levels {
            seq.serialize_element(&(level.price.to_string(), level.amount.to_string()))?;
        }
        seq.end()
    }
}

/// A single trade execution.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Trade {
    pub trade_id: i64,
    #[serde(deserialize_with = "ts::de")]
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
    pub trade_value: f64,
    pub is_buy: bool,
}

impl Trade {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn side(&self) -> Side {
        Side::from_is_buy(self.is_buy)
    }
}

/// A previously seen whale trade scored by value proximity.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SimilarPattern {
    pub trade_id: i64,
    #[serde(deserialize_with = "ts::de")]
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub value: f64,
    pub is_buy: bool,
    pub similarity_score: f64,
}

/// A trade that crossed the whale threshold, enriched by the detector.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WhaleAlert {
    #[serde(flatten)]
    pub trade: Trade,
    /// Whale magnitude, 0..1.
    pub whale_score: f64,
    /// Market sentiment at alert time, -1 (all sells) to 1 (all buys).
    pub bull_bear_sentiment: f64,
    #[serde(default)]
    pub similar_patterns: Vec<SimilarPattern>,
    #[serde(default)]
    pub severity_score: Option<f64>,
    #[serde(default)]
    pub price_move_pct: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub action_label: Option<String>,
}

/// Depth snapshot of the top of the order book.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct OrderBookSnapshot {
    #[serde(default, deserialize_with = "ts::de_opt")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_update_id: Option<u64>,
    #[serde(default, with = "levels")]
    pub bids: Vec<BookLevel>,
    #[serde(default, with = "levels")]
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp.map(|t| t.timestamp_millis())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Derived execution-pattern feature block.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct InstitutionalFeatures {
    #[serde(default)]
    pub size_score: f64,
    #[serde(default)]
    pub slicing_score: f64,
    #[serde(default)]
    pub absorption_score: f64,
    #[serde(default)]
    pub aggression_score: f64,
    #[serde(default)]
    pub impact_anomaly_score: f64,
    #[serde(default)]
    pub flow_ratio_10s: f64,
    #[serde(default)]
    pub flow_ratio_60s: f64,
    #[serde(default)]
    pub range_10s: f64,
    #[serde(default)]
    pub vol_10s: f64,
}

/// Institutional execution signal from the upstream pattern detector.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InstitutionalSignal {
    pub symbol: String,
    pub side: Side,
    pub label: String,
    /// Detector score, 0..100.
    pub score: f64,
    /// Detector confidence, 0..1.
    pub confidence: f64,
    #[serde(default)]
    pub features: InstitutionalFeatures,
    #[serde(deserialize_with = "ts::de_flexible")]
    pub ts: DateTime<Utc>,
}

impl InstitutionalSignal {
    pub fn timestamp_ms(&self) -> i64 {
        self.ts.timestamp_millis()
    }
}

/// Closed union of every event kind the reconstruction engine consumes.
///
/// `MarketState::apply_event` matches on this exhaustively, so adding a new
/// event kind is a compile-time-checked change.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Trade(Trade),
    WhaleAlert(WhaleAlert),
    OrderBook(OrderBookSnapshot),
    #[serde(rename = "institutional_execution")]
    Institutional(InstitutionalSignal),
}

impl DomainEvent {
    /// Parse a raw feed message.
    ///
    /// Order-book payloads arrive either flat or wrapped in a `data` envelope
    /// depending on the upstream emitter; both forms are accepted.
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: serde_json::Value) -> Result<Self, EngineError> {
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "trade" => Ok(Self::Trade(serde_json::from_value(value)?)),
            "whale_alert" => Ok(Self::WhaleAlert(serde_json::from_value(value)?)),
            "order_book" => {
                let inner = match value.get_mut("data") {
                    Some(data) if data.is_object() => data.take(),
                    _ => value,
                };
                Ok(Self::OrderBook(serde_json::from_value(inner)?))
            }
            "institutional_execution" => Ok(Self::Institutional(serde_json::from_value(value)?)),
            other => Err(EngineError::UnknownKind(other.to_string())),
        }
    }

    /// Event timestamp in epoch milliseconds. Order-book snapshots may omit
    /// theirs, in which case the replay envelope or arrival time stands in.
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self {
            Self::Trade(trade) => Some(trade.timestamp_ms()),
            Self::WhaleAlert(alert) => Some(alert.trade.timestamp_ms()),
            Self::OrderBook(snapshot) => snapshot.timestamp_ms(),
            Self::Institutional(signal) => Some(signal.timestamp_ms()),
        }
    }

    /// Unique trade identifier, present for trade-like events only.
    pub fn trade_id(&self) -> Option<i64> {
        match self {
            Self::Trade(trade) => Some(trade.trade_id),
            Self::WhaleAlert(alert) => Some(alert.trade.trade_id),
            _ => None,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Trade(_) => "trade",
            Self::WhaleAlert(_) => "whale_alert",
            Self::OrderBook(_) => "order_book",
            Self::Institutional(_) => "institutional_execution",
        }
    }
}

/// Single record of the replay store's bulk fetch response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayRecord {
    /// Epoch milliseconds; authoritative ordering key for replay.
    pub ts: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl ReplayRecord {
    /// Convert into a domain event, injecting the envelope `type` tag into
    /// the payload so the same parser serves feed and store.
    pub fn into_event(self) -> Result<DomainEvent, EngineError> {
        let mut data = self.data;
        if let Some(map) = data.as_object_mut() {
            map.entry("type".to_string())
                .or_insert(serde_json::Value::String(self.kind.clone()));
        }
        DomainEvent::from_value(data)
    }
}

/// Bulk fetch response from the replay store. Not necessarily sorted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayBatch {
    pub events: Vec<ReplayRecord>,
}
