//! Verification endpoint answered by a service that owns its principals.
//!
//! The credential was already verified for the route's token type; this
//! returns the principal record other services authorize against.

use std::sync::Arc;

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Json,
};

use multiroom_auth::AuthorityEnvelope;
use multiroom_core::ServiceError;

use crate::app::errors::service_error_to_response;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// GET /auth/app/verify, GET /auth/admin/verify
pub async fn verify(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let Some(directory) = services.directory.as_ref() else {
        return service_error_to_response(ServiceError::NotFound);
    };

    match directory.find(principal.subject()).await {
        Ok(Some(record)) => Json(AuthorityEnvelope::ok(record)).into_response(),
        Ok(None) => service_error_to_response(ServiceError::NotFound),
        Err(e) => service_error_to_response(e),
    }
}
