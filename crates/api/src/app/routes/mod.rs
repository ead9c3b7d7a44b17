use axum::{
    routing::{get, post},
    Router,
};

pub mod authority;
pub mod notifications;
pub mod rooms;
pub mod system;

/// Endpoints for app-token holders (bearer header).
pub fn app_router() -> Router {
    Router::new().route("/whoami", get(system::whoami))
}

/// WebSocket upgrade; the app token travels in `?token=`.
pub fn stream_router() -> Router {
    Router::new().route("/ws", get(notifications::upgrade))
}

/// Privileged endpoints for admin-token holders, nested under `/admin`.
pub fn admin_router() -> Router {
    Router::new()
        .route("/notifications/:user_key", post(notifications::publish))
        .route("/rooms/usage/run", post(rooms::run_usage_tick))
}
