pub mod event;
pub mod topic;

pub use event::{encode_batch, OrderflowEvent};
pub use topic::Topic;
