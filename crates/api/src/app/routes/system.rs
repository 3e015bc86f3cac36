use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    let caller = principal.principal();
    Json(json!({
        "sub": caller.subject,
        "email": caller.email,
        "full_name": caller.full_name,
        "employee_id": caller.employee_id,
        "roles": caller.roles,
        "permissions": caller.permissions,
        "exp": principal.expires_at(),
    }))
}
