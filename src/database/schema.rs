// Columns of the store's `orderflow` table read by the poller.
// The table is owned and populated by the ingestion pipeline; this service only reads it.
diesel::table! {
    orderflow (coin, event_time) {
        coin -> Varchar,
        event_time -> Timestamptz,
        price -> Numeric,
        quantity -> Numeric,
        side -> Varchar,
        delta -> Numeric,
        volume_delta -> Numeric,
    }
}
