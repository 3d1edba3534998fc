use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{
    sink::{Sink, SinkExt},
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{encode_batch, Topic};
use crate::stream::{
    DeliveryFailure, ReplayBuffer, StreamError, SubscriberId, SubscriberRegistry, Subscription,
};

/// Shared dependencies of every connection session
pub struct WsState {
    pub registry: Arc<SubscriberRegistry>,
    pub buffers: Arc<ReplayBuffer>,
    pub auth_token: String,
    pub queue_capacity: usize,
    pub send_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub shutdown: CancellationToken,
}

/// Lifecycle of one subscriber connection
///
/// `Connecting -> Authorized -> Active -> Closed`; a bad token goes straight from
/// `Connecting` to `Closed`. Sessions are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authorized,
    Active,
    Closed,
}

/// Check the token presented at handshake against the shared secret
pub fn authorize(expected: &str, presented: Option<&str>) -> Result<(), StreamError> {
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(StreamError::Unauthorized),
    }
}

type WsSender = SplitSink<WebSocket, Message>;

/// Why an active session ended
#[derive(Debug)]
enum Teardown {
    RemoteClosed,
    Pruned,
    Shutdown,
    Delivery(StreamError),
}

impl Teardown {
    /// Close frame owed to the client, if the socket is still usable
    fn close_frame(&self) -> Option<CloseFrame<'static>> {
        match self {
            Teardown::Shutdown => Some(CloseFrame {
                code: close_code::AWAY,
                reason: Cow::from("server shutting down"),
            }),
            Teardown::Pruned => Some(CloseFrame {
                code: close_code::AGAIN,
                reason: Cow::from("subscriber fell behind"),
            }),
            Teardown::RemoteClosed | Teardown::Delivery(_) => None,
        }
    }
}

struct Session {
    topic: Topic,
    state: SessionState,
    ctx: Arc<WsState>,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!("Session on {}: {:?} -> {:?}", self.topic, self.state, next);
        self.state = next;
    }

    async fn send<S>(
        &self,
        sender: &mut S,
        subscriber: SubscriberId,
        message: Message,
    ) -> Result<(), StreamError>
    where
        S: Sink<Message> + Unpin,
    {
        let delivery_error = |reason| StreamError::Delivery { subscriber, reason };

        match tokio::time::timeout(self.ctx.send_timeout, sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(delivery_error(DeliveryFailure::Closed)),
            Err(_) => Err(delivery_error(DeliveryFailure::Timeout)),
        }
    }

    /// Push the replay buffer once, returning the newest event_time sent
    async fn warm_start<S>(
        &self,
        sender: &mut S,
        subscription: &Subscription,
    ) -> Result<Option<DateTime<Utc>>, StreamError>
    where
        S: Sink<Message> + Unpin,
    {
        let snapshot = self.ctx.buffers.snapshot(&self.topic);
        let Some(newest) = snapshot.last().map(|event| event.event_time) else {
            return Ok(None);
        };

        let payload = encode_batch(&snapshot)?;
        self.send(sender, subscription.id(), Message::Text(payload))
            .await?;

        debug!(
            "Warm start: sent {} buffered events on {} to {}",
            snapshot.len(),
            self.topic,
            subscription.id()
        );
        Ok(Some(newest))
    }

    /// Register, then warm-start; a failed push undoes the registration
    async fn activate<S>(
        &mut self,
        sender: &mut S,
    ) -> Result<(Subscription, Option<DateTime<Utc>>), StreamError>
    where
        S: Sink<Message> + Unpin,
    {
        let subscription = self
            .ctx
            .registry
            .subscribe(&self.topic, self.ctx.queue_capacity);
        info!("Subscriber {} connected to {}", subscription.id(), self.topic);

        match self.warm_start(sender, &subscription).await {
            Ok(newest) => {
                self.transition(SessionState::Active);
                Ok((subscription, newest))
            }
            Err(err) => {
                warn!(
                    "Warm start failed for {} on {}: {}",
                    subscription.id(),
                    self.topic,
                    err
                );
                drop(subscription);
                self.transition(SessionState::Closed);
                Err(err)
            }
        }
    }

    async fn run_active(
        &self,
        sender: &mut WsSender,
        receiver: &mut SplitStream<WebSocket>,
        subscription: &mut Subscription,
        warm_until: Option<DateTime<Utc>>,
    ) -> Teardown {
        let period = self.ctx.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let subscriber = subscription.id();

        loop {
            select! {
                _ = self.ctx.shutdown.cancelled() => return Teardown::Shutdown,

                batch = subscription.recv() => {
                    let Some(batch) = batch else {
                        return Teardown::Pruned;
                    };
                    // Already covered by the warm-start snapshot
                    if warm_until.is_some_and(|newest| batch.newest <= newest) {
                        continue;
                    }
                    if let Err(err) = self
                        .send(sender, subscriber, Message::Text(batch.payload.clone()))
                        .await
                    {
                        return Teardown::Delivery(err);
                    }
                }

                msg = receiver.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => return Teardown::RemoteClosed,
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(err) = self.send(sender, subscriber, Message::Pong(data)).await {
                                return Teardown::Delivery(err);
                            }
                        }
                        Some(Err(e)) => {
                            debug!("WebSocket error on {}: {}", self.topic, e);
                            return Teardown::RemoteClosed;
                        }
                        // Subscribers are receive-only
                        Some(Ok(_)) => {}
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(err) = self.send(sender, subscriber, Message::Ping(Vec::new())).await {
                        return Teardown::Delivery(err);
                    }
                }
            }
        }
    }
}

/// Drive one subscriber connection from handshake to teardown
///
/// Registration lives in a [`Subscription`] guard, so the handle is removed from
/// the registry exactly once however the session ends, including when this
/// future is dropped mid-flight.
pub async fn run_session(
    socket: WebSocket,
    topic: Topic,
    token: Option<String>,
    state: Arc<WsState>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session {
        topic,
        state: SessionState::Connecting,
        ctx: state,
    };

    if let Err(err) = authorize(&session.ctx.auth_token, token.as_deref()) {
        warn!("Rejected subscriber on {}: {}", session.topic, err);
        let frame = CloseFrame {
            code: close_code::POLICY,
            reason: Cow::from("invalid token"),
        };
        let _ = tokio::time::timeout(
            session.ctx.send_timeout,
            sender.send(Message::Close(Some(frame))),
        )
        .await;
        session.transition(SessionState::Closed);
        return;
    }
    session.transition(SessionState::Authorized);

    let (mut subscription, warm_until) = match session.activate(&mut sender).await {
        Ok(active) => active,
        Err(_) => {
            let _ = tokio::time::timeout(session.ctx.send_timeout, sender.close()).await;
            return;
        }
    };
    let subscriber = subscription.id();

    let teardown = session
        .run_active(&mut sender, &mut receiver, &mut subscription, warm_until)
        .await;
    drop(subscription);

    if let Some(frame) = teardown.close_frame() {
        let _ = tokio::time::timeout(
            session.ctx.send_timeout,
            sender.send(Message::Close(Some(frame))),
        )
        .await;
    }

    session.transition(SessionState::Closed);
    info!(
        "Subscriber {} disconnected from {} ({:?})",
        subscriber, session.topic, teardown
    );
}
