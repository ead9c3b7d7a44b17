//! Permission check at the handler boundary.
//!
//! Runs after the authentication middleware has attached a
//! [`PrincipalContext`]; the principal record comes from whichever
//! authorization client the services were wired with.

use axum::response::Response;

use multiroom_auth::{Permission, PrincipalRecord};

use crate::app::errors::service_error_to_response;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// Require `permission` for the request's principal.
pub async fn require_permission(
    services: &AppServices,
    principal: &PrincipalContext,
    permission: &Permission,
) -> Result<PrincipalRecord, Response> {
    services
        .authorization
        .check_permission(principal.identity(), permission)
        .await
        .map_err(service_error_to_response)
}
