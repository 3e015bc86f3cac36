//! AMQP publisher with publisher confirms.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel};
use tracing::{info, instrument, warn};

use tessera_events::{
    EventPublisher, IntegrationEvent, OutboundMessage, PERSISTENT_DELIVERY_MODE, PublishError, RoutingKey,
    RoutingTable,
};

use super::connection::{ConnectionError, ConnectionManager};
use super::topology;

impl From<ConnectionError> for PublishError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Transport(reason) => PublishError::Transport(reason),
            other => PublishError::Connection(other.to_string()),
        }
    }
}

/// Publishes to the topic exchange, one channel per publish.
///
/// A channel is opened, put in confirm mode, used for exactly one message
/// and closed, so concurrent publishers never share channel state.
#[derive(Debug, Clone)]
pub struct AmqpPublisher {
    connection: Arc<ConnectionManager>,
    routes: RoutingTable,
    exchange: String,
    timeout: Duration,
}

impl AmqpPublisher {
    pub fn new(connection: Arc<ConnectionManager>, routes: RoutingTable) -> Self {
        let exchange = connection.settings().exchange.clone();
        let timeout = connection.settings().publish_timeout();
        Self {
            connection,
            routes,
            exchange,
            timeout,
        }
    }

    async fn publish_on(&self, channel: &Channel, message: &OutboundMessage) -> Result<(), PublishError> {
        topology::declare_exchange(channel, &self.exchange).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(ConnectionError::transport)?;

        let properties = message_properties(message);
        let confirmation = channel
            .basic_publish(
                &self.exchange,
                message.routing_key().as_str(),
                BasicPublishOptions::default(),
                message.body(),
                properties,
            )
            .await
            .map_err(ConnectionError::transport)?
            .await
            .map_err(ConnectionError::transport)?;

        match confirmation {
            Confirmation::Nack(_) => Err(PublishError::Rejected {
                routing_key: message.routing_key().clone(),
            }),
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }

    #[instrument(
        skip(self, routing_key, event),
        fields(exchange = %self.exchange, routing_key = %routing_key, event_type = event.kind().name()),
        err
    )]
    async fn publish_once(&self, routing_key: &RoutingKey, event: &IntegrationEvent) -> Result<(), PublishError> {
        let message = OutboundMessage::encode_to(&self.routes, routing_key.clone(), event)?;
        let channel = self.connection.acquire_channel().await?;

        let result = self.publish_on(&channel, &message).await;
        if let Err(err) = channel.close(200, "publish complete").await {
            warn!(error = %err, "failed to close publish channel");
        }
        result?;

        info!(
            message_id = %message.message_id(),
            employee_id = %event.employee_id(),
            "published integration event"
        );
        Ok(())
    }
}

/// Persistent JSON, stamped with message id, event type and publish time.
fn message_properties(message: &OutboundMessage) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(message.content_type().into())
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_message_id(message.message_id().to_string().into())
        .with_type(message.kind().name().into())
        .with_timestamp(u64::try_from(message.timestamp().timestamp()).unwrap_or_default())
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    async fn publish_to(&self, routing_key: &RoutingKey, event: &IntegrationEvent) -> Result<(), PublishError> {
        tokio::time::timeout(self.timeout, self.publish_once(routing_key, event))
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))?
    }
}
