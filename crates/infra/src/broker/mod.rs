//! AMQP 0-9-1 adapters for the event fabric (via `lapin`).

pub mod connection;
pub mod publisher;
pub mod subscriber;
pub mod topology;

pub use connection::{ConnectionError, ConnectionManager};
pub use publisher::AmqpPublisher;
pub use subscriber::{AmqpSubscriber, Backoff, ConsumerSupervisor, SessionEnd};
