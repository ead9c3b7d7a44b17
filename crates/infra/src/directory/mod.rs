//! In-memory stores for the data this service owns.
//!
//! Repositories proper (schemas, queries) live outside this workspace; these
//! back the local authorization mode, the room scheduler and the tests.

pub mod principals;
pub mod rooms;

pub use principals::InMemoryPrincipalDirectory;
pub use rooms::{InMemoryRoomUsage, RoomSeed};
