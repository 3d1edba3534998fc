use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::models::{encode_batch, Topic};

use super::cursor::CursorStore;
use super::errors::StreamError;
use super::registry::{OutboundBatch, SubscriberId, SubscriberRegistry};
use super::replay_buffer::ReplayBuffer;
use super::source::{normalize_batch, EventSource};

/// Timing knobs for the poll loop
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Pause between the end of one cycle and the start of the next
    pub poll_interval: Duration,
    /// Upper bound on a single fetch; a slower source counts as failed for that cycle
    pub query_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifetime counters for the poll loop
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PollerStats {
    /// Completed poll cycles
    pub cycles: u64,
    /// Fetches issued against the event source
    pub fetches: u64,
    /// Fetches that errored or timed out
    pub source_failures: u64,
    /// Events appended to replay buffers and broadcast
    pub events_broadcast: u64,
    /// Batches queued to individual subscribers
    pub deliveries: u64,
    /// Subscribers removed after a failed delivery
    pub subscribers_pruned: u64,
}

#[derive(Default)]
struct PollerCounters {
    cycles: AtomicU64,
    fetches: AtomicU64,
    source_failures: AtomicU64,
    events_broadcast: AtomicU64,
    deliveries: AtomicU64,
    subscribers_pruned: AtomicU64,
}

/// What happened to one topic during one cycle
#[derive(Debug)]
pub enum TopicOutcome {
    /// Source answered with nothing new; cursor unchanged
    Idle,
    /// Source or encoding failed; cursor unchanged, retried next cycle
    Failed(StreamError),
    /// New events were buffered and pushed
    Broadcast {
        events: usize,
        delivered: usize,
        pruned: Vec<SubscriberId>,
    },
}

/// Per-topic outcomes of one poll cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(Topic, TopicOutcome)>,
}

impl CycleReport {
    pub fn outcome(&self, topic: &Topic) -> Option<&TopicOutcome> {
        self.outcomes
            .iter()
            .find(|(polled, _)| polled == topic)
            .map(|(_, outcome)| outcome)
    }
}

/// The single poll-and-broadcast loop
///
/// Each cycle polls every topic that has at least one subscriber, exactly once,
/// regardless of how many subscribers it has. New rows advance the topic's
/// cursor, land in its replay buffer and are queued to its subscribers as one
/// JSON array. A failing topic or subscriber never affects the others.
pub struct OrderflowPoller {
    source: Arc<dyn EventSource>,
    registry: Arc<SubscriberRegistry>,
    buffers: Arc<ReplayBuffer>,
    cursors: Arc<CursorStore>,
    config: PollerConfig,
    counters: PollerCounters,
}

impl OrderflowPoller {
    pub fn new(
        source: Arc<dyn EventSource>,
        registry: Arc<SubscriberRegistry>,
        buffers: Arc<ReplayBuffer>,
        cursors: Arc<CursorStore>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            registry,
            buffers,
            cursors,
            config,
            counters: PollerCounters::default(),
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            "📡 Orderflow poller started (interval {:?}, query timeout {:?})",
            self.config.poll_interval,
            self.config.query_timeout
        );

        loop {
            let report = self.poll_once().await;
            if !report.outcomes.is_empty() {
                tracing::trace!("Poll cycle covered {} topics", report.outcomes.len());
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("📡 Orderflow poller stopped");
    }

    /// Run a single cycle over every active topic
    ///
    /// Topics are polled concurrently; each topic is handled by exactly one
    /// future per cycle, so its cursor is never read and written concurrently.
    pub async fn poll_once(&self) -> CycleReport {
        let topics = self.registry.active_topics();

        let outcomes = join_all(topics.into_iter().map(|topic| async move {
            let outcome = self.poll_topic(&topic).await;
            (topic, outcome)
        }))
        .await;

        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        CycleReport { outcomes }
    }

    async fn poll_topic(&self, topic: &Topic) -> TopicOutcome {
        let since = self.cursors.get(topic);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let fetched =
            match tokio::time::timeout(self.config.query_timeout, self.source.fetch(topic, since))
                .await
            {
                Ok(Ok(events)) => events,
                Ok(Err(err)) => return self.source_failed(err),
                Err(_) => return self.source_failed(StreamError::SourceTimeout(topic.clone())),
            };

        let events = normalize_batch(since, fetched);
        let Some(newest) = events.last().map(|event| event.event_time) else {
            return TopicOutcome::Idle;
        };

        let payload = match encode_batch(&events) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("Failed to encode {} events for {}: {}", events.len(), topic, err);
                return TopicOutcome::Failed(err.into());
            }
        };
        let batch = Arc::new(OutboundBatch {
            newest,
            len: events.len(),
            payload,
        });
        let event_count = events.len();

        self.buffers.extend(topic, events);
        self.cursors.advance(topic, newest);

        let report = self.registry.broadcast(topic, batch);
        let failed: Vec<SubscriberId> = report.failed.iter().map(|(id, _)| *id).collect();
        for (id, reason) in &report.failed {
            tracing::info!("Pruning subscriber {} from {}: {}", id, topic, reason);
        }
        let pruned = self.registry.prune(topic, &failed);

        self.counters
            .events_broadcast
            .fetch_add(event_count as u64, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .subscribers_pruned
            .fetch_add(pruned as u64, Ordering::Relaxed);

        tracing::debug!(
            "Broadcast {} events for {} to {} subscribers (cursor -> {})",
            event_count,
            topic,
            report.delivered,
            newest
        );

        TopicOutcome::Broadcast {
            events: event_count,
            delivered: report.delivered,
            pruned: failed,
        }
    }

    fn source_failed(&self, err: StreamError) -> TopicOutcome {
        self.counters.source_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("{}; skipping this cycle", err);
        TopicOutcome::Failed(err)
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            source_failures: self.counters.source_failures.load(Ordering::Relaxed),
            events_broadcast: self.counters.events_broadcast.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            subscribers_pruned: self.counters.subscribers_pruned.load(Ordering::Relaxed),
        }
    }
}
