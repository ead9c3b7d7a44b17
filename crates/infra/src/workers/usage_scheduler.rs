use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use multiroom_core::{RoomUsageService, ServiceResult};
use multiroom_events::{Destinations, MessageBroker};

/// Default pause between two ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Shortest accepted pause; shorter intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Rooms whose usage window was closed.
    pub expired: usize,
    /// Successful publishes (two per room: point, then broadcast).
    pub published: usize,
    pub failed: usize,
}

/// Periodic room-usage expiry with broker fan-out.
///
/// - Schedule: runs once at startup, then every `interval`
/// - Each expired room is published to `<entity>_<room_id>`, then `<entity>`
/// - Failures: logged per publish/tick; never stop the loop
pub struct UsageScheduler {
    rooms: Arc<dyn RoomUsageService>,
    broker: Arc<dyn MessageBroker>,
    destinations: Destinations,
    interval: Duration,
}

impl UsageScheduler {
    pub fn new(
        rooms: Arc<dyn RoomUsageService>,
        broker: Arc<dyn MessageBroker>,
        destinations: Destinations,
    ) -> Self {
        Self {
            rooms,
            broker,
            destinations,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(requested_ms = interval.as_millis() as u64, "usage scheduler interval too short; clamping");
        }
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one expiry pass.
    ///
    /// A failing publish is logged and counted; the remaining publishes still
    /// run. Domain-service failures abort the tick and are returned.
    pub async fn run_tick(&self) -> ServiceResult<TickReport> {
        let expired = self.rooms.expire_usages().await?;
        if expired.is_empty() {
            return Ok(TickReport::default());
        }

        let details = self.rooms.room_details(&expired).await?;
        let mut report = TickReport {
            expired: expired.len(),
            ..TickReport::default()
        };

        for event in &details {
            let body = event.body();
            let point = self.destinations.room(event.room_id);
            for destination in [point.as_str(), self.destinations.broadcast()] {
                match self.broker.publish(destination, &body).await {
                    Ok(()) => report.published += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(room_id = %event.room_id, destination, error = %err, "room usage publish failed");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Spawn the periodic loop. Cancellation is observed between ticks only;
    /// a tick in progress always completes.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        info!(
            entity = self.destinations.entity(),
            interval_ms = self.interval.as_millis() as u64,
            "usage scheduler started"
        );

        // The first tick completes immediately: run once on startup.
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_tick().await {
                Ok(report) if report.expired > 0 => info!(
                    expired = report.expired,
                    published = report.published,
                    failed = report.failed,
                    "room usages expired"
                ),
                Ok(_) => debug!("no room usage expired"),
                Err(err) => warn!(error = %err, "usage scheduler tick failed"),
            }
        }

        info!(entity = self.destinations.entity(), "usage scheduler stopped");
    }
}

impl core::fmt::Debug for UsageScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UsageScheduler")
            .field("entity", &self.destinations.entity())
            .field("interval", &self.interval)
            .finish()
    }
}
