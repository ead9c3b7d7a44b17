//! Queue and destination names.
//!
//! Every name is a pure function of the entity literal and the key; no
//! registry lookup is needed to address a queue.

use multiroom_core::{RoomId, UserKey};

/// Naming scheme for one deployed service's entity (e.g. `dispositivo`, `sala`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    entity: String,
}

impl Destinations {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Per-user inbound queue: `<entity>_usuario_<key>`.
    pub fn user_queue(&self, key: &UserKey) -> String {
        format!("{}_usuario_{}", self.entity, key)
    }

    /// Point destination for one room: `<entity>_<room_id>`.
    pub fn room(&self, room_id: RoomId) -> String {
        format!("{}_{}", self.entity, room_id)
    }

    /// Shared destination observed by all subscribers: `<entity>`.
    pub fn broadcast(&self) -> &str {
        &self.entity
    }
}

/// Dead-letter queue paired with `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}.dlq")
}
