//! Redis-backed broker using the reliable-queue pattern (at-least-once).
//!
//! ## Layout
//!
//! - **Queue**: list `<prefix>:queue:<name>`; producers `LPUSH`, the head is the right end
//! - **In flight**: list `<prefix>:processing:<name>`; `BLMOVE` hands a message out
//!   by moving it here atomically
//! - **Bindings**: set `<prefix>:bindings:<destination>` of queue names
//!
//! Ack removes the message from the processing list. Nack with requeue
//! moves it back to the head with its delivery count bumped. Dead-lettering
//! moves it to the `<name>.dlq` queue. Messages left in a processing list by a
//! crashed consumer are moved back to the head when the queue is consumed
//! again, so one consumer per queue is assumed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use multiroom_events::{dead_letter_queue, Acknowledger, BrokerError, Consumer, Delivery, MessageBroker};

/// Default key prefix.
const DEFAULT_PREFIX: &str = "multiroom";

/// Seconds one `BLMOVE` blocks before polling again.
const BLOCK_TIMEOUT_SECS: f64 = 1.0;

/// Stored form of one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Envelope {
    id: Uuid,
    /// Hand-outs so far, not counting the one in progress.
    delivery_count: u32,
    body: Vec<u8>,
}

impl Envelope {
    fn new(body: &[u8]) -> Self {
        Self {
            id: Uuid::now_v7(),
            delivery_count: 0,
            body: body.to_vec(),
        }
    }

    fn encode(&self) -> Result<String, BrokerError> {
        serde_json::to_string(self).map_err(|e| BrokerError::Serialization(e.to_string()))
    }

    fn decode(raw: &str) -> Result<Self, BrokerError> {
        serde_json::from_str(raw).map_err(|e| BrokerError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn queue(&self, name: &str) -> String {
        format!("{}:queue:{}", self.prefix, name)
    }

    fn processing(&self, name: &str) -> String {
        format!("{}:processing:{}", self.prefix, name)
    }

    fn bindings(&self, destination: &str) -> String {
        format!("{}:bindings:{}", self.prefix, destination)
    }
}

fn command_error(op: &str) -> impl FnOnce(redis::RedisError) -> BrokerError + '_ {
    move |e| {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            BrokerError::Connection(format!("{op}: {e}"))
        } else {
            BrokerError::Command(format!("{op} failed: {e}"))
        }
    }
}

#[derive(Clone)]
pub struct RedisBroker {
    inner: Arc<Inner>,
}

struct Inner {
    client: redis::Client,
    conn: MultiplexedConnection,
    keys: Keys,
    in_flight: InFlightTable,
}

#[derive(Debug, Clone)]
struct InFlight {
    raw: String,
    envelope: Envelope,
}

/// Raw stored form of every message handed out and not yet settled.
///
/// Keyed by queue and tag: tags are only unique within one queue.
#[derive(Debug, Default)]
struct InFlightTable {
    entries: Mutex<HashMap<(String, String), InFlight>>,
}

impl InFlightTable {
    fn entries(&self) -> Result<MutexGuard<'_, HashMap<(String, String), InFlight>>, BrokerError> {
        self.entries
            .lock()
            .map_err(|_| BrokerError::Command("in-flight table lock poisoned".to_string()))
    }

    fn track(&self, queue: &str, tag: &str, in_flight: InFlight) -> Result<(), BrokerError> {
        self.entries()?
            .insert((queue.to_string(), tag.to_string()), in_flight);
        Ok(())
    }

    fn take(&self, queue: &str, tag: &str) -> Result<InFlight, BrokerError> {
        self.entries()?
            .remove(&(queue.to_string(), tag.to_string()))
            .ok_or_else(|| BrokerError::UnknownDelivery {
                queue: queue.to_string(),
                tag: tag.to_string(),
            })
    }
}

/// One freshly encoded envelope per target queue.
fn encode_per_queue(targets: &[String], body: &[u8]) -> Result<Vec<(String, String)>, BrokerError> {
    targets
        .iter()
        .map(|queue| Ok((queue.clone(), Envelope::new(body).encode()?)))
        .collect()
}

impl RedisBroker {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, BrokerError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: impl AsRef<str>,
        prefix: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                conn,
                keys: Keys {
                    prefix: prefix.into(),
                },
                in_flight: InFlightTable::default(),
            }),
        })
    }
}

impl Inner {
    /// Move leftovers of an earlier consumer back to the head of the queue.
    async fn recover(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let processing = self.keys.processing(queue);
        let ready = self.keys.queue(queue);
        let mut moved = 0;
        loop {
            let item: Option<String> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(&ready)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(command_error("LMOVE"))?;
            if item.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }
}

#[async_trait]
impl Acknowledger for Inner {
    #[instrument(skip(self), err)]
    async fn ack(&self, queue: &str, tag: &str) -> Result<(), BrokerError> {
        let in_flight = self.in_flight.take(queue, tag)?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(self.keys.processing(queue))
            .arg(1)
            .arg(&in_flight.raw)
            .query_async(&mut conn)
            .await
            .map_err(command_error("LREM"))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn nack(&self, queue: &str, tag: &str, requeue: bool) -> Result<(), BrokerError> {
        let in_flight = self.in_flight.take(queue, tag)?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(self.keys.processing(queue))
            .arg(1)
            .arg(&in_flight.raw)
            .ignore();

        if requeue {
            let mut envelope = in_flight.envelope;
            envelope.delivery_count += 1;
            pipe.cmd("RPUSH").arg(self.keys.queue(queue)).arg(envelope.encode()?).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(command_error("nack"))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn dead_letter(&self, queue: &str, tag: &str) -> Result<(), BrokerError> {
        let in_flight = self.in_flight.take(queue, tag)?;
        let mut conn = self.conn.clone();
        let dead = Envelope::new(&in_flight.envelope.body).encode()?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(self.keys.processing(queue))
            .arg(1)
            .arg(&in_flight.raw)
            .ignore()
            .cmd("LPUSH")
            .arg(self.keys.queue(&dead_letter_queue(queue)))
            .arg(dead)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error("dead-letter"))?;
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    #[instrument(skip(self, body), fields(bytes = body.len()), err)]
    async fn publish(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError> {
        let mut conn = self.inner.conn.clone();
        let bound: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.inner.keys.bindings(destination))
            .query_async(&mut conn)
            .await
            .map_err(command_error("SMEMBERS"))?;

        let targets = if bound.is_empty() {
            vec![destination.to_string()]
        } else {
            bound
        };

        let mut pipe = redis::pipe();
        for (queue, raw) in encode_per_queue(&targets, body)? {
            pipe.cmd("LPUSH").arg(self.inner.keys.queue(&queue)).arg(raw).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(command_error("LPUSH"))?;

        debug!(destination, queues = targets.len(), "published");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn bind(&self, queue: &str, destination: &str) -> Result<(), BrokerError> {
        let mut conn = self.inner.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(self.inner.keys.bindings(destination))
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(command_error("SADD"))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let recovered = self.inner.recover(queue).await?;
        if recovered > 0 {
            warn!(queue, recovered, "requeued messages left in flight by an earlier consumer");
        }

        // Blocking reads get their own connection so they never stall publishes.
        let blocking = self
            .inner
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Box::new(RedisConsumer {
            queue: queue.to_string(),
            conn: blocking,
            inner: self.inner.clone(),
        }))
    }
}

impl core::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("prefix", &self.inner.keys.prefix)
            .finish()
    }
}

struct RedisConsumer {
    queue: String,
    conn: MultiplexedConnection,
    inner: Arc<Inner>,
}

impl RedisConsumer {
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(self.inner.keys.queue(&self.queue))
            .arg(self.inner.keys.processing(&self.queue))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(BLOCK_TIMEOUT_SECS)
            .query_async(&mut self.conn)
            .await
            .map_err(command_error("BLMOVE"))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let envelope = Envelope::decode(&raw)?;
        let tag = envelope.id.to_string();
        let delivery = Delivery::new(
            self.queue.clone(),
            tag.clone(),
            envelope.body.clone(),
            envelope.delivery_count + 1,
            self.inner.clone(),
        );
        self.inner.in_flight.track(&self.queue, &tag, InFlight { raw, envelope })?;
        Ok(Some(delivery))
    }
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        loop {
            match self.poll().await {
                Ok(Some(delivery)) => return Some(Ok(delivery)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_per_role() {
        let keys = Keys {
            prefix: "multiroom".to_string(),
        };
        assert_eq!(keys.queue("dispositivo_usuario_42"), "multiroom:queue:dispositivo_usuario_42");
        assert_eq!(keys.processing("sala_7"), "multiroom:processing:sala_7");
        assert_eq!(keys.bindings("sala"), "multiroom:bindings:sala");
    }

    #[test]
    fn envelope_keeps_body_bytes_and_count() {
        let mut envelope = Envelope::new(br#"{"cmd":"enable"}"#);
        envelope.delivery_count = 3;

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();

        assert_eq!(decoded, envelope);
        assert!(matches!(Envelope::decode("nope"), Err(BrokerError::Serialization(_))));
    }

    #[test]
    fn identical_bodies_get_distinct_stored_forms() {
        // LREM removes by value; two copies of a body must not collide.
        let a = Envelope::new(b"same").encode().unwrap();
        let b = Envelope::new(b"same").encode().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn fan_out_encodes_a_distinct_envelope_per_queue() {
        let targets = vec!["panel_a".to_string(), "panel_b".to_string()];

        let encoded = encode_per_queue(&targets, b"{}").unwrap();

        assert_eq!(encoded.len(), 2);
        let a = Envelope::decode(&encoded[0].1).unwrap();
        let b = Envelope::decode(&encoded[1].1).unwrap();
        assert_eq!(encoded[0].0, "panel_a");
        assert_ne!(a.id, b.id);
        assert_eq!(a.body, b.body);
    }

    #[test]
    fn in_flight_entries_are_scoped_by_queue() {
        let table = InFlightTable::default();
        let envelope = Envelope::new(b"{}");
        let tag = envelope.id.to_string();
        let raw = envelope.encode().unwrap();
        let entry = InFlight { raw, envelope };

        table.track("panel_a", &tag, entry.clone()).unwrap();
        table.track("panel_b", &tag, entry).unwrap();

        assert!(table.take("panel_a", &tag).is_ok());
        assert!(table.take("panel_b", &tag).is_ok());
        assert!(matches!(
            table.take("panel_a", &tag),
            Err(BrokerError::UnknownDelivery { .. })
        ));
    }
}
