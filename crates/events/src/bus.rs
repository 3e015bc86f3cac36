//! Event publishing abstraction (mechanics only).
//!
//! This module defines the **publisher side** of the integration fabric: a
//! service commits its own state, then hands an [`IntegrationEvent`] to an
//! [`EventPublisher`], which delivers it to a topic exchange under the routing
//! key the [`RoutingTable`] assigns to the event's kind.
//!
//! ## Delivery Guarantees
//!
//! - **Broker acceptance, not consumption**: `Ok(())` means the broker confirmed
//!   the message. Whether any consumer processed it is unknowable here.
//! - **At-least-once downstream**: consumers may see a message more than once
//!   and must be idempotent.
//! - **No rollback**: a failed publish never undoes the caller's committed local
//!   state. Callers log the failure and decide whether to retry later.
//!
//! ## Implementations
//!
//! - `tessera_infra::broker::AmqpPublisher`: AMQP 0-9-1 with publisher confirms
//! - [`crate::InMemoryBroker`]: in-process topic exchange for tests and demos

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::contracts::IntegrationEvent;
use crate::envelope::EnvelopeError;
use crate::routing::RoutingKey;
use crate::routing_table::RoutingTable;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Serialization(#[from] EnvelopeError),

    /// No broker connection could be obtained.
    #[error("broker connection unavailable: {0}")]
    Connection(String),

    /// The connection existed but the publish itself failed.
    #[error("broker transport error: {0}")]
    Transport(String),

    /// The broker negatively acknowledged the message.
    #[error("broker rejected message routed as `{routing_key}`")]
    Rejected { routing_key: RoutingKey },

    #[error("publish did not complete within {0:?}")]
    Timeout(Duration),
}

/// Publishes integration events to the topic exchange.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Routing table used to derive keys from event kinds.
    fn routes(&self) -> &RoutingTable;

    /// Publish under an explicit routing key.
    async fn publish_to(
        &self,
        routing_key: &RoutingKey,
        event: &IntegrationEvent,
    ) -> Result<(), PublishError>;

    /// Publish under the routing key assigned to the event's kind.
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
        let key = self.routes().key_for(event.kind()).clone();
        self.publish_to(&key, event).await
    }

    /// [`EventPublisher::publish`] bounded by `deadline`.
    async fn publish_with_deadline(
        &self,
        event: &IntegrationEvent,
        deadline: Duration,
    ) -> Result<(), PublishError> {
        tokio::time::timeout(deadline, self.publish(event))
            .await
            .map_err(|_| PublishError::Timeout(deadline))?
    }
}

#[async_trait]
impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    fn routes(&self) -> &RoutingTable {
        (**self).routes()
    }

    async fn publish_to(
        &self,
        routing_key: &RoutingKey,
        event: &IntegrationEvent,
    ) -> Result<(), PublishError> {
        (**self).publish_to(routing_key, event).await
    }

    async fn publish(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}
