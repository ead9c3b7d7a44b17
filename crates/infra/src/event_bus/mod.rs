//! Infrastructure broker implementations.
//!
//! The broker abstraction lives in `multiroom-events` as pure mechanics.
//! This module provides infrastructure-backed implementations (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_queue;

#[cfg(feature = "redis")]
pub use redis_queue::RedisBroker;
