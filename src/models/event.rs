use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One orderflow record for a single coin
///
/// Serialized as a flat JSON object with `event_time` rendered as an
/// ISO-8601 string and numeric fields as JSON numbers. Everything except
/// `event_time` is opaque payload and passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderflowEvent {
    /// Exchange timestamp of the trade; cursors advance on this field
    pub event_time: DateTime<Utc>,

    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,

    /// Aggressor side as stored ("buy" / "sell")
    pub side: String,

    /// Signed quantity (positive when the buyer was the aggressor)
    #[serde(with = "rust_decimal::serde::float")]
    pub delta: Decimal,

    #[serde(with = "rust_decimal::serde::float")]
    pub volume_delta: Decimal,
}

impl OrderflowEvent {
    pub fn new(
        event_time: DateTime<Utc>,
        price: Decimal,
        quantity: Decimal,
        side: impl Into<String>,
        delta: Decimal,
        volume_delta: Decimal,
    ) -> Self {
        Self {
            event_time,
            price,
            quantity,
            side: side.into(),
            delta,
            volume_delta,
        }
    }
}

/// Serialize a batch as the JSON array sent over the wire
pub fn encode_batch(events: &[OrderflowEvent]) -> Result<String, serde_json::Error> {
    serde_json::to_string(events)
}
