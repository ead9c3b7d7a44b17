//! Room usage contract consumed by the scheduler.
//!
//! The room repository and its usage-window bookkeeping live outside the
//! realtime core; only the two calls below cross the boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ServiceResult;
use crate::id::RoomId;

/// State change of one room, carried unmodified through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUsageEvent {
    pub room_id: RoomId,
    /// Opaque detail record produced by the room service.
    pub detail: JsonValue,
}

impl RoomUsageEvent {
    pub fn new(room_id: RoomId, detail: JsonValue) -> Self {
        Self { room_id, detail }
    }

    /// Message body published to the broker (the serialized detail record).
    pub fn body(&self) -> Vec<u8> {
        // Serializing a `serde_json::Value` cannot fail.
        serde_json::to_vec(&self.detail).unwrap_or_default()
    }
}

/// Domain service that owns room usage windows.
#[async_trait]
pub trait RoomUsageService: Send + Sync {
    /// Compute and persist usage windows that have elapsed.
    ///
    /// Returns the affected room ids (possibly empty).
    async fn expire_usages(&self) -> ServiceResult<Vec<RoomId>>;

    /// Fetch full detail records for exactly the given rooms.
    async fn room_details(&self, ids: &[RoomId]) -> ServiceResult<Vec<RoomUsageEvent>>;
}
