//! Background workers.

pub mod usage_scheduler;

pub use usage_scheduler::{TickReport, UsageScheduler};
