use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value as JsonValue};
use tracing::info;

use multiroom_auth::permissions::SEND_NOTIFICATIONS;
use multiroom_core::{ServiceError, SubjectId, UserKey};

use crate::app::errors::service_error_to_response;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;
use crate::ws;

/// GET /ws?token=JWT
///
/// The token was verified by the middleware before the upgrade; the socket
/// is bound to the token's subject.
pub async fn upgrade(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let key = principal.user_key();
    info!(user_key = %key, "websocket authenticated");

    let bridge = services.bridge.clone();
    upgrade.on_upgrade(move |socket| ws::serve_socket(socket, bridge, key))
}

/// POST /admin/notifications/:user_key
///
/// Queue a JSON notification for one user. It waits in the user's queue
/// until one of their connections receives it.
pub async fn publish(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(user_id): Path<i64>,
    Json(body): Json<JsonValue>,
) -> Response {
    if let Err(resp) = authz::require_permission(&services, &principal, &SEND_NOTIFICATIONS).await {
        return resp;
    }

    let key = UserKey::from(SubjectId::new(user_id));
    let queue = services.bridge.destinations().user_queue(&key);

    let payload = match serde_json::to_vec(&body) {
        Ok(p) => p,
        Err(e) => return service_error_to_response(ServiceError::internal(e.to_string())),
    };

    if let Err(e) = services.broker.publish(&queue, &payload).await {
        return service_error_to_response(e.into());
    }

    info!(sender = %principal.subject(), user_key = %key, queue = %queue, "notification queued");
    (StatusCode::ACCEPTED, Json(json!({ "queue": queue }))).into_response()
}
