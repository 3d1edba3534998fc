//! Orderflow fan-out core
//!
//! One [`OrderflowPoller`] pulls new rows per active topic from an
//! [`EventSource`], advances the topic's cursor in the [`CursorStore`], keeps the
//! most recent events in the [`ReplayBuffer`] and pushes each batch to every
//! subscriber in the [`SubscriberRegistry`]. Sessions never query the source.

pub mod cursor;
pub mod errors;
pub mod poller;
pub mod registry;
pub mod replay_buffer;
pub mod source;

pub use cursor::{Clock, CursorStore, DEFAULT_GRACE_WINDOW_SECS};
pub use errors::{DeliveryFailure, StreamError};
pub use poller::{CycleReport, OrderflowPoller, PollerConfig, PollerStats, TopicOutcome};
pub use registry::{
    BroadcastReport, OutboundBatch, SubscriberHandle, SubscriberId, SubscriberRegistry,
    Subscription,
};
pub use replay_buffer::{ReplayBuffer, DEFAULT_REPLAY_CAPACITY};
pub use source::{normalize_batch, EventSource};
