//! Router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tower::ServiceBuilder;

use tessera_auth::{JwtValidator, SigningKeyStore};

use crate::middleware::{self, AuthState};

pub mod errors;
pub mod routes;

/// Everything the HTTP surface needs from the running service.
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<dyn JwtValidator>,
    /// Present only on the identity service, which publishes its key set.
    pub key_store: Option<Arc<SigningKeyStore>>,
    pub jwks_max_age: Duration,
}

impl AppState {
    pub fn new(validator: Arc<dyn JwtValidator>) -> Self {
        Self {
            validator,
            key_store: None,
            jwks_max_age: Duration::from_secs(300),
        }
    }

    pub fn with_key_store(mut self, key_store: Arc<SigningKeyStore>, max_age: Duration) -> Self {
        self.key_store = Some(key_store);
        self.jwks_max_age = max_age;
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    let auth_state = AuthState {
        jwt: state.validator.clone(),
    };

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        )))
        .with_state(state.clone());

    let mut public = Router::new().route("/health", get(routes::system::health));
    if state.key_store.is_some() {
        public = public.route("/.well-known/jwks.json", get(routes::discovery::jwks));
    }

    public.with_state(state).merge(protected)
}
