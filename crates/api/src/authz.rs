//! Permission guard for route handlers.

use axum::http::StatusCode;
use axum::response::Response;

use tessera_auth::{Permission, authorize};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Permission needed to read signing-key metadata.
pub const KEYS_READ: &str = "identity.keys.read";

/// 403 unless the caller holds `required` (or the wildcard).
pub fn require_permission(principal: &PrincipalContext, required: &'static str) -> Result<(), Response> {
    authorize(principal.principal(), &Permission::new(required))
        .map_err(|err| json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()))
}
