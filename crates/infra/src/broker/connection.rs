//! Process-wide AMQP connection, established lazily.
//!
//! At most one live connection per process. Publishers and subscribers ask
//! for a fresh channel through [`ConnectionManager::acquire_channel`]; if the
//! connection is missing or no longer connected, a new one is opened first.
//! There is no retry loop here: a failed attempt is returned to the caller,
//! and the consumer supervisor owns reconnect backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lapin::{Channel, Connection, ConnectionProperties};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::BrokerConfig;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection manager has been disposed")]
    Disposed,

    #[error("broker at {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("connecting to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("broker transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    pub(crate) fn transport(err: lapin::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    settings: BrokerConfig,
    connection: Mutex<Option<Connection>>,
    disposed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(settings: BrokerConfig) -> Self {
        Self {
            settings,
            connection: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &BrokerConfig {
        &self.settings
    }

    /// Open a channel on the shared connection, connecting first if needed.
    ///
    /// The lock is held only while the connection is checked or replaced and
    /// the channel opened; callers do their work on the returned channel.
    pub async fn acquire_channel(&self) -> Result<Channel, ConnectionError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConnectionError::Disposed);
        }

        let mut slot = self.connection.lock().await;
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConnectionError::Disposed);
        }

        if let Some(connection) = slot.as_ref() {
            let status = connection.status();
            if status.connected() {
                if status.blocked() {
                    warn!(address = %self.settings.address(), "broker connection is blocked; publishes will stall");
                }
                return connection.create_channel().await.map_err(ConnectionError::transport);
            }
            warn!(address = %self.settings.address(), state = ?status.state(), "broker connection lost; reconnecting");
        }

        let connection = self.connect().await?;
        let channel = connection.create_channel().await.map_err(ConnectionError::transport)?;
        *slot = Some(connection);
        Ok(channel)
    }

    #[instrument(skip(self), fields(address = %self.settings.address(), vhost = %self.settings.virtual_host), err)]
    async fn connect(&self) -> Result<Connection, ConnectionError> {
        let address = self.settings.address();
        let timeout = self.settings.connect_timeout();
        let uri = self.settings.amqp_uri();
        let attempt = Connection::connect(&uri, ConnectionProperties::default());

        let connection = match tokio::time::timeout(timeout, attempt).await {
            Err(_) => return Err(ConnectionError::Timeout { address, timeout }),
            Ok(Err(lapin::Error::IOError(err))) => {
                return Err(ConnectionError::Unreachable {
                    address,
                    reason: err.to_string(),
                });
            }
            Ok(Err(err)) => return Err(ConnectionError::transport(err)),
            Ok(Ok(connection)) => connection,
        };

        let logged_address = address.clone();
        connection.on_error(move |err| {
            error!(address = %logged_address, error = %err, "broker connection failed");
        });

        info!(%address, "broker connection established");
        Ok(connection)
    }

    /// Close the connection. Every later acquisition fails with
    /// [`ConnectionError::Disposed`].
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            match connection.close(200, "shutting down").await {
                Ok(()) => info!(address = %self.settings.address(), "broker connection closed"),
                Err(err) => warn!(address = %self.settings.address(), error = %err, "broker connection shutdown failed"),
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
