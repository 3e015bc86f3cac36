//! Service bootstrap: one binary, four roles.
//!
//! Every role serves HTTP and runs one consumer supervisor for its queue.
//! The identity role validates against its own key store and publishes it;
//! the others validate against the identity service's published key set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tessera_auth::{Rs256JwtValidator, SigningKeyStore, TokenIssuer};
use tessera_events::{EventHandler, EventPublisher};
use tessera_infra::broker::{AmqpPublisher, AmqpSubscriber, ConnectionManager, ConsumerSupervisor};
use tessera_infra::read_model::InMemoryRecordStore;
use tessera_infra::reconcilers::{
    FinanceReconciler, HrReconciler, IdentityReconciler, UserDirectoryReconciler, subscription_for,
};
use tessera_infra::{AppConfig, RemoteJwks, ServiceRole};

use crate::app::{AppState, build_app};

/// How long background tasks get to finish after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let role = config.service.name;
    let routes = config.routing_table()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    let state = if role.issues_tokens() {
        local_trust(&config)?
    } else {
        remote_trust(&config, shutdown_rx.clone(), &mut background).await?
    };

    let connection = Arc::new(ConnectionManager::new(config.broker.clone()));
    let publisher = Arc::new(AmqpPublisher::new(connection.clone(), routes.clone()));
    let handler = reconciler(role, publisher);
    let spec = subscription_for(role, &config.queues, &routes);
    info!(
        role = role.as_str(),
        queue = spec.queue(),
        exchange = %config.broker.exchange,
        "starting consumer"
    );
    let subscriber = AmqpSubscriber::new(connection.clone(), routes);
    background.push(ConsumerSupervisor::new(subscriber, spec, handler).spawn(shutdown_rx));

    let listener = TcpListener::bind(&config.service.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.service.listen_addr))?;
    info!(role = role.as_str(), addr = %listener.local_addr()?, "listening");

    let signal_tx = shutdown_tx.clone();
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown requested");
            let _ = signal_tx.send(true);
        })
        .await
        .context("http server failed")?;

    let _ = shutdown_tx.send(true);
    for task in background {
        if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
            warn!("background task did not stop in time");
        }
    }
    connection.dispose().await;
    info!("stopped");
    Ok(())
}

fn local_trust(config: &AppConfig) -> anyhow::Result<AppState> {
    let keys = Arc::new(SigningKeyStore::from_config(&config.signing_keys()?)?);
    // Refuse to start without a key that can sign right now.
    TokenIssuer::new(keys.clone(), config.issuer_settings()).context("identity service cannot issue tokens")?;
    let current = keys.current_key()?;
    info!(current_kid = current.id(), keys = keys.all_keys().len(), "signing keys loaded");

    let validator = Rs256JwtValidator::new(keys.clone(), config.validation_settings());
    Ok(AppState::new(Arc::new(validator))
        .with_key_store(keys, Duration::from_secs(config.jwt.jwks_max_age_seconds)))
}

async fn remote_trust(
    config: &AppConfig,
    shutdown: watch::Receiver<bool>,
    background: &mut Vec<JoinHandle<()>>,
) -> anyhow::Result<AppState> {
    let uri = config.jwt.jwks_uri().context("jwt.jwks_uri is required")?;
    let jwks = Arc::new(RemoteJwks::new(uri, config.jwt.jwks_cache_ttl()));
    jwks.refresh().await.context("initial key set fetch failed")?;
    background.push(jwks.clone().spawn_refresh(shutdown));

    let validator = Rs256JwtValidator::new(jwks, config.validation_settings());
    Ok(AppState::new(Arc::new(validator)))
}

fn reconciler<P>(role: ServiceRole, publisher: Arc<P>) -> Arc<dyn EventHandler>
where
    P: EventPublisher + 'static,
{
    match role {
        ServiceRole::Identity => Arc::new(IdentityReconciler::new(
            Arc::new(InMemoryRecordStore::new()),
            publisher,
        )),
        ServiceRole::Hr => Arc::new(HrReconciler::new(Arc::new(InMemoryRecordStore::new()), publisher)),
        ServiceRole::UserManagement => Arc::new(UserDirectoryReconciler::new(Arc::new(InMemoryRecordStore::new()))),
        ServiceRole::Finance => Arc::new(FinanceReconciler::new(Arc::new(InMemoryRecordStore::new()))),
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
