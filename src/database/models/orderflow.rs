use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use crate::models::OrderflowEvent;

/// Row of the `orderflow` table as selected by the poller
///
/// The `coin` column is only used as a filter and is not selected.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::database::schema::orderflow)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderflowRow {
    pub event_time: DateTime<Utc>,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: String,
    pub delta: Decimal,
    pub volume_delta: Decimal,
}

impl From<OrderflowRow> for OrderflowEvent {
    fn from(row: OrderflowRow) -> Self {
        OrderflowEvent {
            event_time: row.event_time,
            price: row.price,
            quantity: row.quantity,
            side: row.side,
            delta: row.delta,
            volume_delta: row.volume_delta,
        }
    }
}
