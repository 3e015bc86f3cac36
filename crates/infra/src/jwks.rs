//! Remote key-set cache for services that validate but do not issue tokens.
//!
//! The discovery document is fetched over HTTP and kept in memory. Lookups
//! are answered from the cached copy only; a background task refreshes it
//! every `cache_ttl`. A failed refresh keeps the last good key set.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{CACHE_CONTROL, HeaderValue};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use tessera_auth::{JsonWebKeySet, KeyResolver, ResolvedKeySet, ValidationKey};

const MIN_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("fetching {uri} failed: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{uri} returned no usable RS256 signing keys")]
    NoUsableKeys { uri: String },
}

#[derive(Debug)]
struct CachedKeys {
    keys: ResolvedKeySet,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RemoteJwks {
    uri: String,
    client: reqwest::Client,
    cache_ttl: Duration,
    cached: RwLock<Option<CachedKeys>>,
}

impl RemoteJwks {
    pub fn new(uri: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            uri: uri.into(),
            client: reqwest::Client::new(),
            cache_ttl: cache_ttl.max(MIN_CACHE_TTL),
            cached: RwLock::new(None),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// When the cached key set was fetched, if one has been.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.read().as_ref().map(|cached| cached.fetched_at)
    }

    /// Fetch the document and replace the cached key set. Returns the number
    /// of usable keys.
    #[instrument(skip(self), fields(uri = %self.uri), err)]
    pub async fn refresh(&self) -> Result<usize, JwksError> {
        let fetch_err = |source| JwksError::Fetch {
            uri: self.uri.clone(),
            source,
        };
        let document: JsonWebKeySet = self
            .client
            .get(&self.uri)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_err)?
            .json()
            .await
            .map_err(fetch_err)?;

        let keys = ResolvedKeySet::from_jwks(&document);
        if keys.is_empty() {
            return Err(JwksError::NoUsableKeys { uri: self.uri.clone() });
        }
        let count = keys.len();
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(CachedKeys {
            keys,
            fetched_at: Utc::now(),
        });
        info!(keys = count, "key set refreshed");
        Ok(count)
    }

    /// Refresh every `cache_ttl` until shutdown is signalled.
    pub fn spawn_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.cache_ttl) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(err) = self.refresh().await {
                    error!(error = %err, "key set refresh failed; keeping previous keys");
                }
            }
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<CachedKeys>> {
        self.cached.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyResolver for RemoteJwks {
    fn resolve_validation_keys(&self, kid: Option<&str>) -> Vec<Arc<ValidationKey>> {
        match self.read().as_ref() {
            Some(cached) => cached.keys.resolve_validation_keys(kid),
            None => {
                warn!(uri = %self.uri, "no key set cached yet; rejecting");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};

    use tessera_auth::{SigningKeyConfig, SigningKeyStore};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const K1_PRIVATE: &str = include_str!("../../auth/tests/fixtures/k1_private.pem");

    fn jwks_body() -> String {
        let store = SigningKeyStore::from_config(&[SigningKeyConfig {
            id: "k1".into(),
            current: true,
            private_key_pem: Some(K1_PRIVATE.into()),
            ..Default::default()
        }])
        .unwrap();
        serde_json::to_string(&store.snapshot().jwks).unwrap()
    }

    /// Serves `body` with the status stored in `status` to every connection.
    async fn serve(body: String, status: Arc<AtomicU16>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let code = status.load(Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {code} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/.well-known/jwks.json")
    }

    #[test]
    fn cache_ttl_has_a_floor_of_one_minute() {
        let jwks = RemoteJwks::new("http://localhost/jwks", Duration::from_secs(5));
        assert_eq!(jwks.cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn empty_cache_resolves_nothing() {
        let jwks = RemoteJwks::new("http://localhost/jwks", Duration::from_secs(60));
        assert!(jwks.resolve_validation_keys(None).is_empty());
        assert!(jwks.fetched_at().is_none());
    }

    #[tokio::test]
    async fn refresh_loads_keys_and_failed_refresh_keeps_them() {
        let status = Arc::new(AtomicU16::new(200));
        let uri = serve(jwks_body(), status.clone()).await;
        let jwks = RemoteJwks::new(uri, Duration::from_secs(60));

        assert_eq!(jwks.refresh().await.unwrap(), 1);
        assert_eq!(jwks.resolve_validation_keys(Some("k1")).len(), 1);
        assert!(jwks.resolve_validation_keys(Some("k9")).is_empty());

        status.store(503, Ordering::SeqCst);
        assert!(matches!(jwks.refresh().await, Err(JwksError::Fetch { .. })));
        assert_eq!(jwks.resolve_validation_keys(None).len(), 1);
    }

    #[tokio::test]
    async fn document_without_usable_keys_is_refused() {
        let status = Arc::new(AtomicU16::new(200));
        let uri = serve(r#"{"keys":[]}"#.to_owned(), status).await;
        let jwks = RemoteJwks::new(uri, Duration::from_secs(60));

        assert!(matches!(jwks.refresh().await, Err(JwksError::NoUsableKeys { .. })));
        assert!(jwks.resolve_validation_keys(None).is_empty());
    }
}
