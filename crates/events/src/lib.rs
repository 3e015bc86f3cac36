//! `tessera-events`: integration event contracts and the pub/sub mechanics
//! around them.
//!
//! Transport-agnostic: broker adapters live in `tessera-infra`.

pub mod bus;
pub mod consumer;
pub mod contracts;
pub mod envelope;
pub mod handler;
pub mod in_memory_bus;
pub mod routing;
pub mod routing_table;

pub use bus::{EventPublisher, PublishError};
pub use consumer::{DeliveryOutcome, SubscriptionSpec, dispatch};
pub use contracts::{EventKind, IntegrationEvent};
pub use envelope::{CONTENT_TYPE_JSON, EnvelopeError, OutboundMessage, PERSISTENT_DELIVERY_MODE};
pub use handler::{EventHandler, HandlerError};
pub use in_memory_bus::{DeliveryReport, InMemoryBroker, InMemoryDelivery};
pub use routing::{BindingPattern, RoutingError, RoutingKey};
pub use routing_table::RoutingTable;
