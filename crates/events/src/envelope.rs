//! Wire envelope for integration events.
//!
//! On the wire an event is its camelCase JSON payload plus broker message
//! properties: routing key, content type, persistence flag, message id, type
//! name and timestamp. The kind is recovered from the routing key on the
//! consuming side; the `type` property is informational.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::contracts::{EventKind, IntegrationEvent};
use crate::routing::RoutingKey;
use crate::routing_table::RoutingTable;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// AMQP `delivery_mode` for messages that survive a broker restart.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to serialize {kind}: {source}")]
    Serialize {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("no event kind is routed under `{0}`")]
    UnknownRoutingKey(String),

    #[error("routing key `{key}` carries {routed}, not {actual}")]
    RoutingKeyMismatch {
        key: RoutingKey,
        routed: EventKind,
        actual: EventKind,
    },

    #[error("malformed {kind} payload: {source}")]
    Deserialize {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A serialized event ready to hand to a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    routing_key: RoutingKey,
    kind: EventKind,
    message_id: Uuid,
    timestamp: DateTime<Utc>,
    body: Vec<u8>,
}

impl OutboundMessage {
    /// Encode under the routing key the table assigns to the event's kind.
    pub fn encode(routes: &RoutingTable, event: &IntegrationEvent) -> Result<Self, EnvelopeError> {
        Self::encode_to(routes, routes.key_for(event.kind()).clone(), event)
    }

    /// Encode under an explicit routing key.
    ///
    /// A key the table already routes to another kind is refused; consumers
    /// would decode the body as the wrong contract.
    pub fn encode_to(
        routes: &RoutingTable,
        routing_key: RoutingKey,
        event: &IntegrationEvent,
    ) -> Result<Self, EnvelopeError> {
        let kind = event.kind();
        if let Some(routed) = routes.kind_for(&routing_key) {
            if routed != kind {
                return Err(EnvelopeError::RoutingKeyMismatch {
                    key: routing_key,
                    routed,
                    actual: kind,
                });
            }
        }

        let body = event
            .to_json()
            .map_err(|source| EnvelopeError::Serialize { kind, source })?;

        Ok(Self {
            routing_key,
            kind,
            message_id: Uuid::now_v7(),
            timestamp: Utc::now(),
            body,
        })
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Decode a received message body using its routing key.
pub fn decode(
    routes: &RoutingTable,
    routing_key: &str,
    body: &[u8],
) -> Result<IntegrationEvent, EnvelopeError> {
    let kind = routes
        .kind_for_str(routing_key)
        .ok_or_else(|| EnvelopeError::UnknownRoutingKey(routing_key.to_owned()))?;
    IntegrationEvent::from_json(kind, body).map_err(|source| EnvelopeError::Deserialize { kind, source })
}
