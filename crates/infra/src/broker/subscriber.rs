//! AMQP subscriber and its reconnecting supervisor.
//!
//! [`AmqpSubscriber::consume`] runs one consume session: declare topology,
//! start a manual-ack consumer, and feed every delivery through
//! [`tessera_events::dispatch`]. [`ConsumerSupervisor`] runs sessions in a
//! loop, backing off between failed attempts, until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use tessera_events::{DeliveryOutcome, EventHandler, RoutingTable, SubscriptionSpec, dispatch};

use super::connection::{ConnectionError, ConnectionManager};
use super::topology;

/// Why a consume session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    /// The broker closed the delivery stream (channel or connection lost).
    StreamClosed,
}

#[derive(Debug, Clone)]
pub struct AmqpSubscriber {
    connection: Arc<ConnectionManager>,
    routes: RoutingTable,
    exchange: String,
    prefetch: u16,
    handler_timeout: Duration,
    dead_letter_exchange: Option<String>,
}

impl AmqpSubscriber {
    pub fn new(connection: Arc<ConnectionManager>, routes: RoutingTable) -> Self {
        let settings = connection.settings();
        Self {
            exchange: settings.exchange.clone(),
            prefetch: settings.prefetch.max(1),
            handler_timeout: settings.handler_timeout(),
            dead_letter_exchange: settings.dead_letter_exchange().map(str::to_owned),
            connection,
            routes,
        }
    }

    /// Run a single consume session.
    #[instrument(skip_all, fields(queue = spec.queue(), handler = handler.name()))]
    pub async fn consume(
        &self,
        spec: &SubscriptionSpec,
        handler: &dyn EventHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, ConnectionError> {
        let session = self.subscribe(spec).await?;
        self.drain(session, handler, shutdown).await
    }

    /// Declare topology and start a manual-ack consumer on `spec`'s queue.
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Session, ConnectionError> {
        let channel = self.connection.acquire_channel().await?;

        topology::declare_exchange(&channel, &self.exchange).await?;
        if let Some(dlx) = self.dead_letter_exchange.as_deref() {
            topology::declare_exchange(&channel, dlx).await?;
        }
        topology::declare_queue(&channel, &self.exchange, spec, self.dead_letter_exchange.as_deref()).await?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(ConnectionError::transport)?;

        let consumer_tag = format!("{}-{}", spec.queue(), Uuid::now_v7());
        let deliveries = channel
            .basic_consume(
                spec.queue(),
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(ConnectionError::transport)?;

        info!(
            %consumer_tag,
            patterns = ?spec.patterns().iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            "consuming"
        );
        Ok(Session { channel, deliveries })
    }

    async fn drain(
        &self,
        session: Session,
        handler: &dyn EventHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, ConnectionError> {
        let Session {
            channel,
            mut deliveries,
        } = session;

        let end = loop {
            if *shutdown.borrow() {
                break SessionEnd::Shutdown;
            }
            let next = tokio::select! {
                _ = shutdown.changed() => break SessionEnd::Shutdown,
                next = deliveries.next() => next,
            };
            let delivery = match next {
                None => break SessionEnd::StreamClosed,
                Some(Err(err)) => return Err(ConnectionError::transport(err)),
                Some(Ok(delivery)) => delivery,
            };

            let outcome = dispatch(
                &self.routes,
                handler,
                delivery.routing_key.as_str(),
                &delivery.data,
                Some(self.handler_timeout),
            )
            .await;
            debug!(
                delivery_tag = delivery.delivery_tag,
                redelivered = delivery.redelivered,
                ?outcome,
                "settling delivery"
            );
            settle(&delivery, outcome).await?;
        };

        if end == SessionEnd::Shutdown {
            if let Err(err) = channel.close(200, "consumer stopped").await {
                warn!(error = %err, "failed to close consumer channel");
            }
        }
        Ok(end)
    }
}

/// An open consumer and the channel it lives on.
struct Session {
    channel: Channel,
    deliveries: Consumer,
}

async fn settle(delivery: &Delivery, outcome: DeliveryOutcome) -> Result<(), ConnectionError> {
    let result = match outcome {
        DeliveryOutcome::Ack => delivery.acker.ack(BasicAckOptions::default()).await,
        DeliveryOutcome::Requeue => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
        }
        DeliveryOutcome::Reject => delivery.acker.reject(BasicRejectOptions { requeue: false }).await,
    };
    result.map_err(ConnectionError::transport)
}

/// Capped exponential backoff between failed consume sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Consecutive failures after a session ends. A session that got as far as
/// consuming was healthy, so its loss counts as the first failure.
fn failures_after(previous: u32, subscribed: bool) -> u32 {
    if subscribed { 1 } else { previous.saturating_add(1) }
}

/// Keeps one subscription alive across connection loss.
pub struct ConsumerSupervisor {
    subscriber: AmqpSubscriber,
    spec: SubscriptionSpec,
    handler: Arc<dyn EventHandler>,
    backoff: Backoff,
}

impl ConsumerSupervisor {
    pub fn new(subscriber: AmqpSubscriber, spec: SubscriptionSpec, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            subscriber,
            spec,
            handler,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.spec.queue().to_owned();
        let mut failures = 0u32;

        loop {
            let (subscribed, result) = match self.subscriber.subscribe(&self.spec).await {
                Ok(session) => (
                    true,
                    self.subscriber
                        .drain(session, self.handler.as_ref(), &mut shutdown)
                        .await,
                ),
                Err(err) => (false, Err(err)),
            };
            match result {
                Ok(SessionEnd::Shutdown) | Err(ConnectionError::Disposed) => break,
                Ok(SessionEnd::StreamClosed) => {
                    failures = failures_after(failures, subscribed);
                    warn!(%queue, "delivery stream closed; resubscribing");
                }
                Err(err) => {
                    failures = failures_after(failures, subscribed);
                    error!(%queue, failures, error = %err, "consume session failed");
                }
            }

            let delay = self.backoff.delay(failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            // A dropped sender counts as shutdown.
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }
        }

        info!(%queue, "consumer stopped");
    }
}
