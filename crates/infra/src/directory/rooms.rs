//! Rooms with time-boxed usage windows.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use multiroom_core::{RoomId, RoomUsageEvent, RoomUsageService, ServiceError, ServiceResult};

#[derive(Debug, Clone)]
struct Room {
    name: String,
    usage_ends_at: Option<DateTime<Utc>>,
}

/// One room as loaded from a rooms file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomSeed {
    pub id: RoomId,
    pub nombre: String,
    /// End of an open usage window, if the room is in use.
    #[serde(default)]
    pub fin_uso: Option<DateTime<Utc>>,
}

/// Room service keeping usage windows in memory.
///
/// A usage window is open from [`start_usage`](Self::start_usage) until its
/// end time; [`RoomUsageService::expire_usages`] closes every window whose
/// end time has passed.
#[derive(Debug, Default)]
pub struct InMemoryRoomUsage {
    rooms: Mutex<BTreeMap<RoomId, Room>>,
}

impl InMemoryRoomUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(seeds: impl IntoIterator<Item = RoomSeed>) -> Self {
        let rooms = seeds
            .into_iter()
            .map(|seed| {
                (
                    seed.id,
                    Room {
                        name: seed.nombre,
                        usage_ends_at: seed.fin_uso,
                    },
                )
            })
            .collect();
        Self {
            rooms: Mutex::new(rooms),
        }
    }

    fn rooms(&self) -> ServiceResult<MutexGuard<'_, BTreeMap<RoomId, Room>>> {
        self.rooms
            .lock()
            .map_err(|_| ServiceError::internal("room store lock poisoned"))
    }

    pub fn add_room(&self, id: RoomId, name: impl Into<String>) -> ServiceResult<()> {
        self.rooms()?.insert(
            id,
            Room {
                name: name.into(),
                usage_ends_at: None,
            },
        );
        Ok(())
    }

    /// Open (or extend) the room's usage window until `ends_at`.
    pub fn start_usage(&self, id: RoomId, ends_at: DateTime<Utc>) -> ServiceResult<()> {
        let mut rooms = self.rooms()?;
        let room = rooms.get_mut(&id).ok_or(ServiceError::NotFound)?;
        room.usage_ends_at = Some(ends_at);
        Ok(())
    }

    pub fn in_use(&self, id: RoomId) -> ServiceResult<bool> {
        let rooms = self.rooms()?;
        let room = rooms.get(&id).ok_or(ServiceError::NotFound)?;
        Ok(room.usage_ends_at.is_some())
    }

    /// Close every window that ended at or before `now`.
    pub fn expire_usages_at(&self, now: DateTime<Utc>) -> ServiceResult<Vec<RoomId>> {
        let mut rooms = self.rooms()?;
        let mut expired = Vec::new();
        for (id, room) in rooms.iter_mut() {
            if room.usage_ends_at.is_some_and(|ends| ends <= now) {
                room.usage_ends_at = None;
                expired.push(*id);
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "usage windows closed");
        }
        Ok(expired)
    }
}

fn detail(id: RoomId, room: &Room) -> RoomUsageEvent {
    RoomUsageEvent::new(
        id,
        json!({
            "id": id.get(),
            "nombre": room.name,
            "en_uso": room.usage_ends_at.is_some(),
            "fin_uso": room.usage_ends_at,
        }),
    )
}

#[async_trait]
impl RoomUsageService for InMemoryRoomUsage {
    async fn expire_usages(&self) -> ServiceResult<Vec<RoomId>> {
        self.expire_usages_at(Utc::now())
    }

    async fn room_details(&self, ids: &[RoomId]) -> ServiceResult<Vec<RoomUsageEvent>> {
        let rooms = self.rooms()?;
        Ok(ids
            .iter()
            .filter_map(|id| rooms.get(id).map(|room| detail(*id, room)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> InMemoryRoomUsage {
        let rooms = InMemoryRoomUsage::new();
        for (id, name) in [(7, "Sala 7"), (8, "Sala 8"), (9, "Sala 9")] {
            rooms.add_room(RoomId::new(id), name).unwrap();
        }
        rooms
    }

    #[test]
    fn only_elapsed_windows_expire() {
        let rooms = store();
        let now = Utc::now();
        rooms.start_usage(RoomId::new(7), now - Duration::seconds(1)).unwrap();
        rooms.start_usage(RoomId::new(8), now + Duration::minutes(5)).unwrap();
        rooms.start_usage(RoomId::new(9), now).unwrap();

        let expired = rooms.expire_usages_at(now).unwrap();

        assert_eq!(expired, vec![RoomId::new(7), RoomId::new(9)]);
        assert!(!rooms.in_use(RoomId::new(7)).unwrap());
        assert!(rooms.in_use(RoomId::new(8)).unwrap());

        // Already closed windows are not reported twice.
        assert!(rooms.expire_usages_at(now).unwrap().is_empty());
    }

    #[tokio::test]
    async fn details_cover_exactly_the_requested_rooms() {
        let rooms = store();

        let details = rooms
            .room_details(&[RoomId::new(9), RoomId::new(404), RoomId::new(7)])
            .await
            .unwrap();

        let ids: Vec<_> = details.iter().map(|d| d.room_id).collect();
        assert_eq!(ids, vec![RoomId::new(9), RoomId::new(7)]);
        assert_eq!(details[0].detail["nombre"], "Sala 9");
        assert_eq!(details[0].detail["en_uso"], false);
    }

    #[test]
    fn seeded_windows_expire_like_started_ones() {
        let seeds: Vec<RoomSeed> = serde_json::from_str(
            r#"[
                {"id": 7, "nombre": "Sala 7", "fin_uso": "2026-01-01T10:00:00Z"},
                {"id": 8, "nombre": "Sala 8"}
            ]"#,
        )
        .unwrap();
        let rooms = InMemoryRoomUsage::with_rooms(seeds);

        assert!(rooms.in_use(RoomId::new(7)).unwrap());
        assert!(!rooms.in_use(RoomId::new(8)).unwrap());

        let now = "2026-01-01T10:00:01Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(rooms.expire_usages_at(now).unwrap(), vec![RoomId::new(7)]);
    }

    #[test]
    fn unknown_room_cannot_start_usage() {
        let rooms = store();
        assert_eq!(
            rooms.start_usage(RoomId::new(1), Utc::now()),
            Err(ServiceError::NotFound)
        );
    }
}
