//! Delivery dispatch: decode, hand to the handler, decide ack/nack.
//!
//! Broker adapters (AMQP, in-memory) own the transport; this module owns the
//! decision of what to do with each delivery so every transport behaves the
//! same way:
//!
//! | Situation                         | Outcome                        |
//! |-----------------------------------|--------------------------------|
//! | routing key maps to no event kind | [`DeliveryOutcome::Ack`] (logged, dropped) |
//! | body does not decode              | [`DeliveryOutcome::Reject`] (dead-lettered) |
//! | handler succeeded                 | [`DeliveryOutcome::Ack`]       |
//! | handler failed or timed out       | [`DeliveryOutcome::Requeue`]   |

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::envelope::{self, EnvelopeError};
use crate::handler::EventHandler;
use crate::routing::{BindingPattern, RoutingKey};
use crate::routing_table::RoutingTable;

/// A queue and the patterns it is bound with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    queue: String,
    patterns: Vec<BindingPattern>,
}

impl SubscriptionSpec {
    pub fn new(queue: impl Into<String>, patterns: impl IntoIterator<Item = BindingPattern>) -> Self {
        Self {
            queue: queue.into(),
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn patterns(&self) -> &[BindingPattern] {
        &self.patterns
    }

    /// Whether a message published under `key` would land in this queue.
    pub fn accepts(&self, key: &RoutingKey) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(key))
    }
}

/// What the transport should do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remove from the queue.
    Ack,
    /// Negative-acknowledge and put back for redelivery.
    Requeue,
    /// Negative-acknowledge without requeue (dead-letter if configured).
    Reject,
}

/// Decode one delivery and run `handler` on it.
///
/// `deadline` bounds the handler; an overrun counts as a failure.
pub async fn dispatch<H>(
    routes: &RoutingTable,
    handler: &H,
    routing_key: &str,
    body: &[u8],
    deadline: Option<Duration>,
) -> DeliveryOutcome
where
    H: EventHandler + ?Sized,
{
    let event = match envelope::decode(routes, routing_key, body) {
        Ok(event) => event,
        Err(EnvelopeError::UnknownRoutingKey(_)) => {
            warn!(handler = handler.name(), routing_key, "no event kind for routing key; dropping message");
            return DeliveryOutcome::Ack;
        }
        Err(err) => {
            error!(handler = handler.name(), routing_key, error = %err, "undecodable message; rejecting");
            return DeliveryOutcome::Reject;
        }
    };

    let kind = event.kind();
    let employee_id = event.employee_id().clone();
    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, handler.handle(&event)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(handler = handler.name(), %kind, %employee_id, ?limit, "handler timed out; requeueing");
                return DeliveryOutcome::Requeue;
            }
        },
        None => handler.handle(&event).await,
    };

    match result {
        Ok(()) => {
            debug!(handler = handler.name(), %kind, %employee_id, "event handled");
            DeliveryOutcome::Ack
        }
        Err(err) => {
            warn!(handler = handler.name(), %kind, %employee_id, error = %err, "handler failed; requeueing");
            DeliveryOutcome::Requeue
        }
    }
}
