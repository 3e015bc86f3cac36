//! Idempotent exchange/queue declarations shared by publishers and subscribers.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, ExchangeKind};

use tessera_events::SubscriptionSpec;

use super::connection::ConnectionError;

/// Declare the topic exchange: durable, not auto-deleted.
pub async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<(), ConnectionError> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(ConnectionError::transport)
}

/// Declare the subscription's durable queue and bind every pattern.
pub async fn declare_queue(
    channel: &Channel,
    exchange: &str,
    spec: &SubscriptionSpec,
    dead_letter_exchange: Option<&str>,
) -> Result<(), ConnectionError> {
    let mut arguments = FieldTable::default();
    if let Some(dlx) = dead_letter_exchange {
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(dlx.into()),
        );
    }

    channel
        .queue_declare(
            spec.queue(),
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..QueueDeclareOptions::default()
            },
            arguments,
        )
        .await
        .map_err(ConnectionError::transport)?;

    for pattern in spec.patterns() {
        channel
            .queue_bind(
                spec.queue(),
                exchange,
                pattern.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(ConnectionError::transport)?;
    }
    Ok(())
}
