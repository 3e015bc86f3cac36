//! Key publication for validating services.

use axum::{
    Json,
    extract::{Extension, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::app::AppState;
use crate::app::errors::json_error;
use crate::authz::{KEYS_READ, require_permission};
use crate::context::PrincipalContext;

/// `GET /.well-known/jwks.json`: public keys only, cacheable.
pub async fn jwks(State(state): State<AppState>) -> Response {
    let Some(store) = state.key_store.as_ref() else {
        return json_error(StatusCode::NOT_FOUND, "not_found", "this service does not publish keys");
    };
    let cache_control = format!("public, max-age={}", state.jwks_max_age.as_secs());
    ([(header::CACHE_CONTROL, cache_control)], Json(store.snapshot().jwks)).into_response()
}

/// `GET /keys`: the full discovery snapshot, including which key is current.
pub async fn keys(State(state): State<AppState>, Extension(principal): Extension<PrincipalContext>) -> Response {
    if let Err(denied) = require_permission(&principal, KEYS_READ) {
        return denied;
    }
    match state.key_store.as_ref() {
        Some(store) => Json(store.snapshot()).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "not_found", "this service does not publish keys"),
    }
}
