use axum::{Router, routing::get};

use crate::app::AppState;

pub mod discovery;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/keys", get(discovery::keys))
}
