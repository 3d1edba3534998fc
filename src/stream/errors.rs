//! Error types for the fan-out core
//!
//! None of these are fatal to the process. A source failure skips one topic
//! for one poll cycle; a delivery failure removes one subscriber.

use thiserror::Error;

use crate::database::connection::DatabaseError;
use crate::models::Topic;

use super::registry::SubscriberId;

/// Errors raised inside the poll/broadcast loop and connection sessions
///
/// # Error Categories
///
/// - **Authentication**: `Unauthorized`
/// - **Source**: `SourceQuery`, `SourceTimeout`
/// - **Delivery**: `Delivery`
/// - **Encoding**: `Serialization`
#[derive(Debug, Error)]
pub enum StreamError {
    /// Token presented at connect did not match the shared secret
    #[error("Unauthorized: invalid token")]
    Unauthorized,

    /// The event source failed to answer a fetch for a topic
    #[error("Source query failed for {topic}: {message}")]
    SourceQuery { topic: Topic, message: String },

    /// The event source did not answer within the query timeout
    #[error("Source query timed out for {0}")]
    SourceTimeout(Topic),

    /// A push to one subscriber could not be queued
    #[error("Delivery to subscriber {subscriber} failed: {reason}")]
    Delivery {
        subscriber: SubscriberId,
        reason: DeliveryFailure,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a push to a subscriber's outbound queue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    /// Outbound queue is full; the consumer stopped draining it
    #[error("outbound queue full")]
    QueueFull,

    /// The session dropped its end of the queue, or its socket is gone
    #[error("subscriber gone")]
    Closed,

    /// A socket write did not complete within the send timeout
    #[error("send timed out")]
    Timeout,
}

impl StreamError {
    /// Wrap a store error as a per-topic source failure
    pub fn source(topic: &Topic, err: impl std::fmt::Display) -> Self {
        StreamError::SourceQuery {
            topic: topic.clone(),
            message: err.to_string(),
        }
    }

    /// Returns true if the event source failed (recovered by skipping the topic this cycle)
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            StreamError::SourceQuery { .. } | StreamError::SourceTimeout(_)
        )
    }

    /// Returns true if a single subscriber could not be reached (recovered by pruning it)
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, StreamError::Delivery { .. })
    }
}

impl From<(Topic, DatabaseError)> for StreamError {
    fn from((topic, err): (Topic, DatabaseError)) -> Self {
        StreamError::SourceQuery {
            topic,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::source(&Topic::new("BTCUSDT"), "connection reset");
        assert_eq!(
            err.to_string(),
            "Source query failed for btcusdt: connection reset"
        );
        assert_eq!(
            StreamError::Unauthorized.to_string(),
            "Unauthorized: invalid token"
        );
    }

    #[test]
    fn test_error_categories() {
        assert!(StreamError::SourceTimeout(Topic::new("ethusdt")).is_source_failure());
        assert!(StreamError::source(&Topic::new("ethusdt"), "boom").is_source_failure());

        let delivery = StreamError::Delivery {
            subscriber: SubscriberId::new(),
            reason: DeliveryFailure::QueueFull,
        };
        assert!(delivery.is_delivery_failure());
        assert!(!delivery.is_source_failure());
        assert!(!StreamError::Unauthorized.is_source_failure());
    }

    #[test]
    fn test_database_error_maps_to_source_failure() {
        let err: StreamError = (
            Topic::new("btcusdt"),
            DatabaseError::QueryError("syntax".to_string()),
        )
            .into();
        assert!(err.is_source_failure());
    }
}
