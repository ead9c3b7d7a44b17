//! `multiroom-core` — identifiers, error taxonomy and domain-service contracts.
//!
//! This crate has no infrastructure concerns.

pub mod error;
pub mod id;
pub mod rooms;

pub use error::{ServiceError, ServiceResult};
pub use id::{ConnectionId, RoomId, SubjectId, UserKey};
pub use rooms::{RoomUsageEvent, RoomUsageService};
