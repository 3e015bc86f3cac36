//! Consumer-side handler abstraction.

use async_trait::async_trait;
use thiserror::Error;

use tessera_core::DomainError;

use crate::bus::PublishError;
use crate::contracts::IntegrationEvent;

/// Why a handler could not finish processing an event.
///
/// Every variant leads to redelivery; handlers never drop a message by
/// returning an error.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Local state was committed but a derived event could not be published.
    #[error("derived event not published: {0}")]
    Publish(#[from] PublishError),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

/// Reacts to integration events delivered from a queue.
///
/// Implementations must be idempotent: the same event may arrive more than
/// once (redelivery after a crash, a nack, or a lost ack), and handling it a
/// second time must leave state unchanged and emit no duplicate events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &IntegrationEvent) -> Result<(), HandlerError>;
}
