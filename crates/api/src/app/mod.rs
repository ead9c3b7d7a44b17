//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: broker, authorization client, bridge and scheduler wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use multiroom_auth::TokenType;

use crate::middleware::{self, AuthState, CredentialSource};

pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let gate = |expected: TokenType, source: CredentialSource| {
        axum::middleware::from_fn_with_state(
            AuthState::new(services.verifier.clone(), expected, source),
            middleware::auth_middleware,
        )
    };

    let app = routes::app_router()
        .route_layer(gate(TokenType::AccessApp, CredentialSource::BearerHeader));

    let stream = routes::stream_router()
        .route_layer(gate(TokenType::AccessApp, CredentialSource::QueryParam));

    let admin = routes::admin_router()
        .route_layer(gate(TokenType::AccessAdmin, CredentialSource::BearerHeader));

    let mut router = Router::new()
        .route("/health", get(routes::system::health))
        .merge(app)
        .merge(stream)
        .nest("/admin", admin);

    // Only a service that owns its principals acts as an authority.
    if services.directory.is_some() {
        router = router
            .route(
                "/auth/app/verify",
                get(routes::authority::verify)
                    .route_layer(gate(TokenType::AccessApp, CredentialSource::BearerHeader)),
            )
            .route(
                "/auth/admin/verify",
                get(routes::authority::verify)
                    .route_layer(gate(TokenType::AccessAdmin, CredentialSource::BearerHeader)),
            );
    }

    router.layer(ServiceBuilder::new().layer(Extension(services)))
}
