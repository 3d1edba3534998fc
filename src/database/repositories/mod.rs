/// Read-side repository over the event store
///
/// The poller depends on the `EventSource` trait; `RepositoryEventSource`
/// adapts the blocking diesel repository to it.

pub mod orderflow_repository;

pub use orderflow_repository::{OrderflowRepository, OrderflowRepositoryImpl, RepositoryEventSource};
