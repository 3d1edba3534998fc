use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::sync::Arc;

use crate::database::connection::{DatabaseError, PgPooledConnection};
use crate::database::models::OrderflowRow;
use crate::database::schema::orderflow;
use crate::models::{OrderflowEvent, Topic};
use crate::stream::{EventSource, StreamError};

/// Orderflow repository trait - cursor-bounded reads for one coin
pub trait OrderflowRepository: Send + Sync {
    /// Rows for `coin` with `event_time > since`, oldest first, at most `limit`
    fn fetch_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderflowRow>, DatabaseError>;

    /// Every row for `coin` stamped exactly `at`
    fn fetch_at(&self, coin: &str, at: DateTime<Utc>) -> Result<Vec<OrderflowRow>, DatabaseError>;
}

/// Concrete implementation of OrderflowRepository
pub struct OrderflowRepositoryImpl {
    get_conn: Arc<dyn Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync>,
}

impl OrderflowRepositoryImpl {
    /// Create new orderflow repository with connection provider
    pub fn new<F>(get_conn: F) -> Self
    where
        F: Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            get_conn: Arc::new(get_conn),
        }
    }
}

impl OrderflowRepository for OrderflowRepositoryImpl {
    fn fetch_since(
        &self,
        coin: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderflowRow>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        orderflow::table
            .filter(orderflow::coin.eq(coin))
            .filter(orderflow::event_time.gt(since))
            .order(orderflow::event_time.asc())
            .limit(limit)
            .select(OrderflowRow::as_select())
            .load::<OrderflowRow>(&mut conn)
            .map_err(DatabaseError::from)
    }

    fn fetch_at(&self, coin: &str, at: DateTime<Utc>) -> Result<Vec<OrderflowRow>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        orderflow::table
            .filter(orderflow::coin.eq(coin))
            .filter(orderflow::event_time.eq(at))
            .select(OrderflowRow::as_select())
            .load::<OrderflowRow>(&mut conn)
            .map_err(DatabaseError::from)
    }
}

/// Cut a page to `limit` rows without splitting a group of equal timestamps
///
/// `rows` is a `limit + 1` read. The cursor is exclusive, so rows left behind
/// at the page's last timestamp would never be fetched again. When the extra
/// row shares that timestamp the trailing group is deferred to the next fetch;
/// a page that is one group end to end is re-read whole.
fn complete_final_group<R: OrderflowRepository + ?Sized>(
    repository: &R,
    coin: &str,
    mut rows: Vec<OrderflowRow>,
    limit: usize,
) -> Result<Vec<OrderflowRow>, DatabaseError> {
    if rows.len() <= limit {
        return Ok(rows);
    }

    let boundary = rows[limit - 1].event_time;
    if rows[limit].event_time != boundary {
        rows.truncate(limit);
        return Ok(rows);
    }

    match rows.iter().position(|row| row.event_time == boundary) {
        Some(group_start) if group_start > 0 => {
            rows.truncate(group_start);
            Ok(rows)
        }
        _ => {
            tracing::debug!("Page for {} is a single timestamp {}; reading it whole", coin, boundary);
            repository.fetch_at(coin, boundary)
        }
    }
}

/// Async `EventSource` over a blocking repository
///
/// Each fetch runs on the blocking thread pool so diesel never stalls the
/// runtime that drives sessions.
pub struct RepositoryEventSource<R> {
    repository: Arc<R>,
    fetch_limit: i64,
}

impl<R: OrderflowRepository + 'static> RepositoryEventSource<R> {
    pub fn new(repository: Arc<R>, fetch_limit: i64) -> Self {
        Self {
            repository,
            fetch_limit: fetch_limit.max(1),
        }
    }
}

#[async_trait]
impl<R: OrderflowRepository + 'static> EventSource for RepositoryEventSource<R> {
    async fn fetch(
        &self,
        topic: &Topic,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderflowEvent>, StreamError> {
        let repository = Arc::clone(&self.repository);
        let coin = topic.as_str().to_string();
        let limit = self.fetch_limit;

        let rows = tokio::task::spawn_blocking(move || {
            let rows = repository.fetch_since(&coin, since, limit + 1)?;
            complete_final_group(repository.as_ref(), &coin, rows, limit as usize)
        })
        .await
        .map_err(|e| DatabaseError::QueryError(format!("query task failed: {}", e)))
        .and_then(|result| result)
        .map_err(|e| StreamError::from((topic.clone(), e)))?;

        Ok(rows.into_iter().map(OrderflowEvent::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::normalize_batch;
    use chrono::Duration;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    /// In-memory repository honoring the same filter/order/limit contract
    #[derive(Default)]
    struct MemoryRepository {
        rows: Vec<(String, OrderflowRow)>,
        requests: Mutex<Vec<(String, DateTime<Utc>, i64)>>,
        fail: bool,
    }

    impl OrderflowRepository for MemoryRepository {
        fn fetch_since(
            &self,
            coin: &str,
            since: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<OrderflowRow>, DatabaseError> {
            self.requests.lock().push((coin.to_string(), since, limit));
            if self.fail {
                return Err(DatabaseError::ConnectionPoolError("no connection".to_string()));
            }
            let mut rows: Vec<OrderflowRow> = self
                .rows
                .iter()
                .filter(|(c, row)| c == coin && row.event_time > since)
                .map(|(_, row)| row.clone())
                .collect();
            rows.sort_by_key(|row| row.event_time);
            rows.truncate(limit as usize);
            Ok(rows)
        }

        fn fetch_at(
            &self,
            coin: &str,
            at: DateTime<Utc>,
        ) -> Result<Vec<OrderflowRow>, DatabaseError> {
            Ok(self
                .rows
                .iter()
                .filter(|(c, row)| c == coin && row.event_time == at)
                .map(|(_, row)| row.clone())
                .collect())
        }
    }

    /// Poll `topic` like the loop does: fetch, normalize, advance the cursor
    async fn drain(
        source: &RepositoryEventSource<MemoryRepository>,
        topic: &Topic,
        mut cursor: DateTime<Utc>,
        cycles: usize,
    ) -> Vec<OrderflowEvent> {
        let mut delivered = Vec::new();
        for _ in 0..cycles {
            let events = normalize_batch(cursor, source.fetch(topic, cursor).await.unwrap());
            if let Some(last) = events.last() {
                cursor = last.event_time;
            }
            delivered.extend(events);
        }
        delivered
    }

    fn row(at: DateTime<Utc>) -> OrderflowRow {
        OrderflowRow {
            event_time: at,
            price: dec!(100),
            quantity: dec!(1),
            side: "buy".to_string(),
            delta: dec!(1),
            volume_delta: dec!(100),
        }
    }

    #[tokio::test]
    async fn test_fetch_passes_normalized_coin_and_limit() {
        let now = Utc::now();
        let repository = Arc::new(MemoryRepository {
            rows: vec![
                ("btcusdt".to_string(), row(now + Duration::seconds(2))),
                ("btcusdt".to_string(), row(now + Duration::seconds(1))),
                ("btcusdt".to_string(), row(now + Duration::seconds(3))),
                ("ethusdt".to_string(), row(now + Duration::seconds(1))),
            ],
            ..Default::default()
        });
        let source = RepositoryEventSource::new(repository.clone(), 2);

        let events = source.fetch(&Topic::new("BTCUSDT"), now).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_time, now + Duration::seconds(1));
        assert_eq!(events[1].event_time, now + Duration::seconds(2));
        assert_eq!(
            repository.requests.lock().clone(),
            vec![("btcusdt".to_string(), now, 3)]
        );
    }

    #[tokio::test]
    async fn test_repository_error_becomes_source_failure() {
        let repository = Arc::new(MemoryRepository {
            fail: true,
            ..Default::default()
        });
        let source = RepositoryEventSource::new(repository, 100);

        let err = source
            .fetch(&Topic::new("ethusdt"), Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_source_failure());
        assert!(err.to_string().contains("ethusdt"));
    }

    #[tokio::test]
    async fn test_full_page_defers_a_split_timestamp_group() {
        let now = Utc::now();
        let t1 = now + Duration::milliseconds(5);
        let t2 = now + Duration::milliseconds(9);
        let mut rows = vec![("btcusdt".to_string(), row(t1))];
        rows.extend((0..3).map(|_| ("btcusdt".to_string(), row(t2))));
        let repository = Arc::new(MemoryRepository {
            rows,
            ..Default::default()
        });
        let source = RepositoryEventSource::new(repository, 3);
        let topic = Topic::new("btcusdt");

        let first = source.fetch(&topic, now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event_time, t1);

        let delivered = drain(&source, &topic, now, 5).await;
        assert_eq!(delivered.len(), 4);
        assert_eq!(delivered.iter().filter(|e| e.event_time == t2).count(), 3);
    }

    #[tokio::test]
    async fn test_page_of_one_timestamp_is_read_whole() {
        let now = Utc::now();
        let at = now + Duration::milliseconds(1);
        let repository = Arc::new(MemoryRepository {
            rows: (0..3).map(|_| ("btcusdt".to_string(), row(at))).collect(),
            ..Default::default()
        });
        let source = RepositoryEventSource::new(repository, 2);

        let delivered = drain(&source, &Topic::new("btcusdt"), now, 5).await;

        assert_eq!(delivered.len(), 3);
        assert!(delivered.iter().all(|e| e.event_time == at));
    }

    #[test]
    fn test_live_fetch_since() {
        // Requires a live store with an `orderflow` table
        let Ok(database_url) = std::env::var("ORDERFLOW_DATABASE_URL") else {
            return;
        };

        let pool = crate::database::establish_connection_pool(&database_url, 1).unwrap();
        let repository = OrderflowRepositoryImpl::new(move || pool.get_conn());
        let since = Utc::now() - Duration::hours(1);

        let rows = repository.fetch_since("btcusdt", since, 10).unwrap();

        assert!(rows.len() <= 10);
        assert!(rows.iter().all(|row| row.event_time > since));
        assert!(rows.windows(2).all(|pair| pair[0].event_time <= pair[1].event_time));
    }
}
