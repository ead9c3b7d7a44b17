//! Infrastructure layer: broker backends, authority client, in-memory
//! domain services and background workers.

pub mod directory;
pub mod event_bus;
pub mod external;
pub mod workers;

pub use directory::{InMemoryPrincipalDirectory, InMemoryRoomUsage, RoomSeed};
pub use external::RemoteAuthorization;
pub use workers::{TickReport, UsageScheduler};
