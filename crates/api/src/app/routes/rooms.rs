use std::sync::Arc;

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Json,
};

use multiroom_auth::permissions::MANAGE_ROOMS;

use crate::app::errors::service_error_to_response;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

/// POST /admin/rooms/usage/run - run one expiry pass now and report it.
pub async fn run_usage_tick(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = authz::require_permission(&services, &principal, &MANAGE_ROOMS).await {
        return resp;
    }

    match services.scheduler.run_tick().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => service_error_to_response(e),
    }
}
