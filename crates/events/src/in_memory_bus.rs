//! In-memory topic broker for tests/dev.
//!
//! Mirrors the parts of AMQP topic routing the services depend on:
//!
//! - one topic exchange; queues are bound with [`BindingPattern`]s
//! - queues are durable: messages wait until someone consumes them
//! - deliveries stay unacknowledged until settled; a requeue puts the message
//!   back at the head of the queue flagged as redelivered
//! - rejected messages are parked on a per-queue dead-letter list
//!
//! No IO, no background tasks. Consumption is driven explicitly through
//! [`InMemoryBroker::deliver_ready`], which keeps tests deterministic.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::bus::{EventPublisher, PublishError};
use crate::consumer::{self, DeliveryOutcome, SubscriptionSpec};
use crate::contracts::IntegrationEvent;
use crate::envelope::{self, OutboundMessage};
use crate::handler::EventHandler;
use crate::routing::{BindingPattern, RoutingKey};
use crate::routing_table::RoutingTable;

/// A message handed to a consumer and awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryDelivery {
    pub tag: u64,
    pub routing_key: RoutingKey,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

/// Tally of one [`InMemoryBroker::deliver_ready`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub acked: usize,
    pub requeued: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: RoutingKey,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    patterns: Vec<BindingPattern>,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    dead_letters: Vec<StoredMessage>,
}

impl QueueState {
    fn accepts(&self, key: &RoutingKey) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(key))
    }
}

#[derive(Debug)]
struct BrokerState {
    queues: BTreeMap<String, QueueState>,
    published: Vec<OutboundMessage>,
    next_tag: u64,
    available: bool,
}

#[derive(Debug)]
pub struct InMemoryBroker {
    routes: RoutingTable,
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new(routes: RoutingTable) -> Self {
        Self {
            routes,
            state: Mutex::new(BrokerState {
                queues: BTreeMap::new(),
                published: Vec::new(),
                next_tag: 1,
                available: true,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // State stays consistent across a panicking holder: every mutation is a
        // single push/pop/insert.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a queue and bind its patterns. Re-declaring adds new patterns
    /// and keeps queued messages.
    pub fn declare_queue(&self, spec: &SubscriptionSpec) {
        let mut state = self.state();
        let queue = state.queues.entry(spec.queue().to_owned()).or_default();
        for pattern in spec.patterns() {
            if !queue.patterns.contains(pattern) {
                queue.patterns.push(pattern.clone());
            }
        }
    }

    /// Simulate losing (or regaining) the broker.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Route a raw body, bypassing encoding. Useful for poison-message tests.
    pub fn publish_raw(&self, routing_key: RoutingKey, body: Vec<u8>) -> usize {
        let mut state = self.state();
        Self::route(&mut state, &routing_key, &body)
    }

    fn route(state: &mut BrokerState, routing_key: &RoutingKey, body: &[u8]) -> usize {
        let mut matched = 0;
        for queue in state.queues.values_mut().filter(|queue| queue.accepts(routing_key)) {
            queue.ready.push_back(StoredMessage {
                routing_key: routing_key.clone(),
                body: body.to_vec(),
                redelivered: false,
            });
            matched += 1;
        }
        matched
    }

    /// Take the next ready message from `queue`, if any.
    pub fn next_delivery(&self, queue: &str) -> Option<InMemoryDelivery> {
        let mut state = self.state();
        let tag = state.next_tag;
        let queue = state.queues.get_mut(queue)?;
        let message = queue.ready.pop_front()?;
        queue.unacked.insert(tag, message.clone());
        state.next_tag += 1;

        Some(InMemoryDelivery {
            tag,
            routing_key: message.routing_key,
            body: message.body,
            redelivered: message.redelivered,
        })
    }

    /// Settle an unacknowledged delivery. Unknown tags are ignored.
    pub fn settle(&self, queue: &str, tag: u64, outcome: DeliveryOutcome) {
        let mut state = self.state();
        let Some(queue) = state.queues.get_mut(queue) else {
            return;
        };
        let Some(mut message) = queue.unacked.remove(&tag) else {
            return;
        };
        match outcome {
            DeliveryOutcome::Ack => {}
            DeliveryOutcome::Requeue => {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            DeliveryOutcome::Reject => queue.dead_letters.push(message),
        }
    }

    /// Deliver every message that is ready right now to `handler`, once each.
    ///
    /// Requeued messages are left for the next pass, so a handler that keeps
    /// failing cannot spin this call forever.
    pub async fn deliver_ready<H>(&self, queue: &str, handler: &H) -> DeliveryReport
    where
        H: EventHandler + ?Sized,
    {
        let mut report = DeliveryReport::default();
        let mut requeued = Vec::new();
        for _ in 0..self.ready_count(queue) {
            let Some(delivery) = self.next_delivery(queue) else {
                break;
            };
            let outcome = consumer::dispatch(
                &self.routes,
                handler,
                delivery.routing_key.as_str(),
                &delivery.body,
                None,
            )
            .await;
            debug!(queue, tag = delivery.tag, redelivered = delivery.redelivered, ?outcome, "delivery settled");
            match outcome {
                DeliveryOutcome::Ack => report.acked += 1,
                DeliveryOutcome::Requeue => {
                    report.requeued += 1;
                    requeued.push(delivery.tag);
                    continue;
                }
                DeliveryOutcome::Reject => report.rejected += 1,
            }
            self.settle(queue, delivery.tag, outcome);
        }
        // Each requeue goes to the head, so settle in reverse to keep publish order.
        for tag in requeued.into_iter().rev() {
            self.settle(queue, tag, DeliveryOutcome::Requeue);
        }
        report
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |queue| queue.ready.len())
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |queue| queue.unacked.len())
    }

    pub fn dead_letter_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |queue| queue.dead_letters.len())
    }

    /// Every message accepted by the exchange, in publish order.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state().published.clone()
    }

    /// Accepted messages decoded back into events.
    pub fn published_events(&self) -> Vec<IntegrationEvent> {
        self.published()
            .iter()
            .filter_map(|message| {
                envelope::decode(&self.routes, message.routing_key().as_str(), message.body()).ok()
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    async fn publish_to(
        &self,
        routing_key: &RoutingKey,
        event: &IntegrationEvent,
    ) -> Result<(), PublishError> {
        let message = OutboundMessage::encode_to(&self.routes, routing_key.clone(), event)?;

        let mut state = self.state();
        if !state.available {
            return Err(PublishError::Connection("in-memory broker marked unavailable".into()));
        }
        let matched = Self::route(&mut state, message.routing_key(), message.body());
        info!(
            routing_key = %message.routing_key(),
            event_type = message.kind().name(),
            queues = matched,
            "published integration event"
        );
        state.published.push(message);
        Ok(())
    }
}
