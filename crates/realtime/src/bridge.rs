//! Per-user broker queue multiplexed onto live connections.
//!
//! One consumer runs per user key while the key has at least one live
//! connection. Each delivery is fanned out to every connection in the
//! snapshot taken when the message arrives, then settled once:
//!
//! | connections | writes             | settlement                          |
//! |-------------|--------------------|-------------------------------------|
//! | none        | -                  | nack + requeue                      |
//! | some        | at least one ok    | ack                                 |
//! | some        | all failed         | nack + requeue, or dead-letter once the delivery count reaches the cap |

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use multiroom_core::{ConnectionId, UserKey};
use multiroom_events::{BrokerError, Consumer, Delivery, Destinations, MessageBroker};

use crate::connection::{ConnectionError, ConnectionHandle};
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Dead-letter a message whose writes all failed once it has been handed
    /// out this many times. `None` requeues forever.
    pub max_deliveries: Option<u32>,
    /// Upper bound for one connection write.
    pub write_timeout: Duration,
    /// Pause before retrying after a broker error.
    pub retry_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_deliveries: None,
            write_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    NoConnections,
    AllWritesFailed,
}

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked { delivered: usize, failed: usize },
    Requeued(RequeueReason),
    DeadLettered { delivery_count: u32 },
}

#[derive(Clone)]
pub struct NotificationBridge {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn MessageBroker>,
    destinations: Destinations,
    config: BridgeConfig,
}

impl NotificationBridge {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<dyn MessageBroker>,
        destinations: Destinations,
        config: BridgeConfig,
    ) -> Self {
        Self {
            registry,
            broker,
            destinations,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    /// Register `conn` under `key`. Starts the key's consumer when this is
    /// the key's first live connection and returns its task.
    pub fn attach(&self, key: &UserKey, conn: ConnectionHandle) -> Option<JoinHandle<()>> {
        let connection_id = conn.id();
        let registration = self.registry.add(key, conn);
        info!(user_key = %key, %connection_id, "connection attached");

        if !registration.created {
            return None;
        }

        let bridge = self.clone();
        let key = key.clone();
        Some(tokio::spawn(async move {
            bridge.consume_loop(key, registration.lifetime).await;
        }))
    }

    /// Deregister a connection. The key's consumer stops when it was the last one.
    pub fn detach(&self, key: &UserKey, connection_id: ConnectionId) {
        if self.registry.remove(key, connection_id).is_some() {
            info!(user_key = %key, %connection_id, "connection detached");
        }
    }

    /// Fan one delivery out to the key's current connections and settle it.
    #[instrument(
        skip(self, delivery),
        fields(user_key = %key, queue = delivery.queue(), delivery_count = delivery.delivery_count())
    )]
    pub async fn deliver(
        &self,
        key: &UserKey,
        delivery: Delivery,
    ) -> Result<DeliveryOutcome, BrokerError> {
        let connections = self.registry.connections_for(key);
        if connections.is_empty() {
            debug!("no live connection; requeueing");
            delivery.nack(true).await?;
            return Ok(DeliveryOutcome::Requeued(RequeueReason::NoConnections));
        }

        let mut delivered = 0usize;
        let mut failed = 0usize;
        for conn in connections {
            match self.write(&conn, delivery.body()).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    failed += 1;
                    warn!(connection_id = %conn.id(), error = %err, "write failed; dropping connection");
                    self.registry.remove(key, conn.id());
                    conn.close().await;
                }
            }
        }

        if delivered > 0 {
            delivery.ack().await?;
            return Ok(DeliveryOutcome::Acked { delivered, failed });
        }

        let delivery_count = delivery.delivery_count();
        match self.config.max_deliveries {
            Some(cap) if delivery_count >= cap => {
                warn!(cap, "every write failed and redelivery cap reached; dead-lettering");
                delivery.dead_letter().await?;
                Ok(DeliveryOutcome::DeadLettered { delivery_count })
            }
            _ => {
                debug!("every write failed; requeueing");
                delivery.nack(true).await?;
                Ok(DeliveryOutcome::Requeued(RequeueReason::AllWritesFailed))
            }
        }
    }

    async fn write(&self, conn: &ConnectionHandle, payload: &[u8]) -> Result<(), ConnectionError> {
        match tokio::time::timeout(self.config.write_timeout, conn.send(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    async fn consume_loop(self, key: UserKey, lifetime: CancellationToken) {
        let queue = self.destinations.user_queue(&key);
        info!(user_key = %key, queue = %queue, "consumer started");

        'open: while let Some(mut consumer) = self.open_consumer(&queue, &lifetime).await {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => break 'open,
                    next = consumer.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => {
                        if let Err(err) = self.deliver(&key, delivery).await {
                            warn!(user_key = %key, queue = %queue, error = %err, "failed to settle delivery");
                        }
                    }
                    Some(Err(err)) => {
                        warn!(user_key = %key, queue = %queue, error = %err, "consume error");
                        if !self.pause(&lifetime).await {
                            break 'open;
                        }
                    }
                    None => {
                        warn!(user_key = %key, queue = %queue, "consumer closed by broker; reopening");
                        continue 'open;
                    }
                }
            }
        }

        info!(user_key = %key, queue = %queue, "consumer stopped");
    }

    /// `None` when the lifetime ends before a consumer could be opened.
    async fn open_consumer(
        &self,
        queue: &str,
        lifetime: &CancellationToken,
    ) -> Option<Box<dyn Consumer>> {
        loop {
            let opened = tokio::select! {
                biased;
                _ = lifetime.cancelled() => return None,
                opened = self.broker.consume(queue) => opened,
            };
            match opened {
                Ok(consumer) => return Some(consumer),
                Err(err) => {
                    warn!(queue, error = %err, "failed to open consumer");
                    if !self.pause(lifetime).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the retry backoff; `false` if cancelled meanwhile.
    async fn pause(&self, lifetime: &CancellationToken) -> bool {
        tokio::select! {
            _ = lifetime.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_backoff) => true,
        }
    }
}

impl core::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("entity", &self.destinations.entity())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingConnection;
    use multiroom_events::InMemoryBroker;

    fn bridge_with(broker: &InMemoryBroker, config: BridgeConfig) -> NotificationBridge {
        NotificationBridge::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(broker.clone()),
            Destinations::new("dispositivo"),
            config,
        )
    }

    async fn take(broker: &InMemoryBroker, queue: &str) -> Delivery {
        let mut consumer = broker.consume(queue).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), consumer.next())
            .await
            .expect("no delivery")
            .expect("consumer closed")
            .expect("delivery error")
    }

    const QUEUE: &str = "dispositivo_usuario_42";

    fn key() -> UserKey {
        UserKey::new("42")
    }

    #[tokio::test]
    async fn empty_set_requeues() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        broker.publish(QUEUE, b"{}").await.unwrap();

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Requeued(RequeueReason::NoConnections));
        assert_eq!(broker.ready_count(QUEUE), 1);
        assert_eq!(broker.unacked_count(QUEUE), 0);
    }

    #[tokio::test]
    async fn empty_set_requeues_even_past_the_cap() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(
            &broker,
            BridgeConfig {
                max_deliveries: Some(1),
                ..BridgeConfig::default()
            },
        );
        broker.publish(QUEUE, b"{}").await.unwrap();

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Requeued(RequeueReason::NoConnections));
        assert_eq!(broker.ready_count("dispositivo_usuario_42.dlq"), 0);
    }

    #[tokio::test]
    async fn single_connection_receives_once_and_message_is_acked() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        let (conn, handle) = RecordingConnection::pair();
        bridge.registry().add(&key(), handle);
        broker.publish(QUEUE, br#"{"cmd":"enable"}"#).await.unwrap();

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Acked { delivered: 1, failed: 0 });
        assert_eq!(conn.sent(), vec![br#"{"cmd":"enable"}"#.to_vec()]);
        assert_eq!(broker.ready_count(QUEUE), 0);
        assert_eq!(broker.unacked_count(QUEUE), 0);
    }

    #[tokio::test]
    async fn failing_connection_is_dropped_and_live_one_still_acks() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        let (broken, broken_handle) = RecordingConnection::pair();
        let (live, live_handle) = RecordingConnection::pair();
        broken.fail_writes();
        bridge.registry().add(&key(), broken_handle.clone());
        bridge.registry().add(&key(), live_handle.clone());
        broker.publish(QUEUE, b"ping").await.unwrap();

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Acked { delivered: 1, failed: 1 });
        assert_eq!(live.sent(), vec![b"ping".to_vec()]);
        assert!(broken.is_closed());
        assert_eq!(bridge.registry().connections_for(&key()), vec![live_handle]);
    }

    #[tokio::test]
    async fn all_writes_failing_requeues_and_empties_the_set() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        let (broken, handle) = RecordingConnection::pair();
        broken.fail_writes();
        bridge.registry().add(&key(), handle);
        broker.publish(QUEUE, b"ping").await.unwrap();

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Requeued(RequeueReason::AllWritesFailed));
        assert_eq!(broker.ready_count(QUEUE), 1);
        assert!(!bridge.registry().contains(&key()));
    }

    #[tokio::test]
    async fn slow_write_counts_as_failure() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(
            &broker,
            BridgeConfig {
                write_timeout: Duration::from_millis(20),
                ..BridgeConfig::default()
            },
        );
        let (stuck, handle) = RecordingConnection::pair();
        stuck.stall_writes();
        bridge.registry().add(&key(), handle);
        broker.publish(QUEUE, b"ping").await.unwrap();

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Requeued(RequeueReason::AllWritesFailed));
        assert!(stuck.is_closed());
    }

    #[tokio::test]
    async fn all_writes_failing_at_the_cap_dead_letters() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(
            &broker,
            BridgeConfig {
                max_deliveries: Some(2),
                ..BridgeConfig::default()
            },
        );
        broker.publish(QUEUE, b"poison").await.unwrap();

        // First hand-out: no connection, requeued with count 1.
        bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        let (broken, handle) = RecordingConnection::pair();
        broken.fail_writes();
        bridge.registry().add(&key(), handle);

        let outcome = bridge.deliver(&key(), take(&broker, QUEUE).await).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::DeadLettered { delivery_count: 2 });
        assert_eq!(broker.ready_count(QUEUE), 0);
        assert_eq!(
            broker.ready_messages("dispositivo_usuario_42.dlq"),
            vec![b"poison".to_vec()]
        );
    }

    #[tokio::test]
    async fn attached_user_receives_published_command() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        let (conn, handle) = RecordingConnection::pair();

        let task = bridge.attach(&key(), handle.clone());
        assert!(task.is_some());
        broker.publish(QUEUE, br#"{"cmd":"enable"}"#).await.unwrap();

        conn.wait_for(1).await;
        assert_eq!(conn.sent(), vec![br#"{"cmd":"enable"}"#.to_vec()]);

        // Settlement happens right after the write.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.ready_count(QUEUE), 0);
        assert_eq!(broker.unacked_count(QUEUE), 0);

        bridge.detach(&key(), handle.id());
    }

    #[tokio::test]
    async fn second_connection_reuses_the_running_consumer() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        let (a, a_handle) = RecordingConnection::pair();
        let (b, b_handle) = RecordingConnection::pair();

        assert!(bridge.attach(&key(), a_handle).is_some());
        assert!(bridge.attach(&key(), b_handle).is_none());

        broker.publish(QUEUE, b"both").await.unwrap();
        a.wait_for(1).await;
        b.wait_for(1).await;
    }

    #[tokio::test]
    async fn messages_published_while_offline_arrive_on_connect() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        broker.publish(QUEUE, b"one").await.unwrap();
        broker.publish(QUEUE, b"two").await.unwrap();

        let (conn, handle) = RecordingConnection::pair();
        bridge.attach(&key(), handle);

        conn.wait_for(2).await;
        assert_eq!(conn.sent(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn consumer_stops_when_last_connection_detaches() {
        let broker = InMemoryBroker::new();
        let bridge = bridge_with(&broker, BridgeConfig::default());
        let (_conn, handle) = RecordingConnection::pair();

        let task = bridge.attach(&key(), handle.clone()).unwrap();
        bridge.detach(&key(), handle.id());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("consumer did not stop")
            .unwrap();

        broker.publish(QUEUE, b"later").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.ready_count(QUEUE), 1);
        assert_eq!(broker.unacked_count(QUEUE), 0);
    }
}
