//! Live connection registry and the per-user notification bridge.

pub mod bridge;
pub mod connection;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{BridgeConfig, DeliveryOutcome, NotificationBridge, RequeueReason};
pub use connection::{Connection, ConnectionError, ConnectionHandle};
pub use registry::{ConnectionRegistry, Registration};
