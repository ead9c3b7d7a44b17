use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};
use serde_json::json;

use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// GET /health - liveness plus live connection counts.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let registry = services.bridge.registry();
    Json(json!({
        "status": "ok",
        "users": registry.user_count(),
        "connections": registry.connection_count(),
    }))
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    Json(json!({
        "id": principal.subject().get(),
        "type": principal.token_type().as_str(),
        "user_key": principal.user_key().as_str(),
    }))
}
