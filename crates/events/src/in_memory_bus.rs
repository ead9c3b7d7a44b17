//! In-memory broker for tests/dev.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::bus::{Acknowledger, BrokerError, Consumer, Delivery, MessageBroker};
use crate::naming::dead_letter_queue;

/// In-memory broker with named queues, bindings and manual acknowledgement.
///
/// - No IO
/// - Per-queue FIFO; requeued messages go back to the head
/// - Unacknowledged deliveries stay pending until settled
/// - A queue that is empty, unbound and no longer consumed is dropped
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    bindings: Mutex<HashMap<String, HashSet<String>>>,
    next_tag: AtomicU64,
    /// Ready messages kept per queue; the oldest is dropped on overflow.
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
    consumers: AtomicUsize,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<String, StoredMessage>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    delivery_count: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BrokerError> {
    mutex
        .lock()
        .map_err(|_| BrokerError::Command("broker state lock poisoned".to_string()))
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every queue to `capacity` ready messages. Publishing into a full
    /// queue drops its oldest message; requeued deliveries are always kept.
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: Some(capacity.max(1)),
                ..Inner::default()
            }),
        }
    }

    /// Whether `queue` currently exists.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.existing(queue).is_some()
    }

    /// Messages waiting to be delivered on `queue`.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.inspect(queue, |s| s.ready.len())
    }

    /// Messages handed out on `queue` and not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.inspect(queue, |s| s.unacked.len())
    }

    /// Bodies waiting on `queue`, head first.
    pub fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inspect(queue, |s| s.ready.iter().map(|m| m.body.clone()).collect())
    }

    fn inspect<R: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> R) -> R {
        let Some(queue) = self.inner.existing(queue) else {
            return R::default();
        };
        match queue.state.lock() {
            Ok(state) => f(&state),
            Err(_) => R::default(),
        }
    }
}

impl Inner {
    fn queue(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        let mut queues = lock(&self.queues)?;
        Ok(queues.entry(name.to_string()).or_default().clone())
    }

    fn existing(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.lock().ok()?.get(name).cloned()
    }

    fn enqueue(&self, name: &str, message: StoredMessage, front: bool) -> Result<(), BrokerError> {
        // Held until the message is stored so the queue cannot be dropped in between.
        let mut queues = lock(&self.queues)?;
        let queue = queues.entry(name.to_string()).or_default().clone();
        {
            let mut state = lock(&queue.state)?;
            if front {
                state.ready.push_front(message);
            } else {
                if let Some(capacity) = self.capacity {
                    while state.ready.len() >= capacity {
                        state.ready.pop_front();
                        warn!(queue = name, capacity, "queue full; dropped oldest message");
                    }
                }
                state.ready.push_back(message);
            }
        }
        drop(queues);
        queue.notify.notify_one();
        Ok(())
    }

    fn attach_consumer(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        let mut queues = lock(&self.queues)?;
        let queue = queues.entry(name.to_string()).or_default().clone();
        queue.consumers.fetch_add(1, Ordering::SeqCst);
        Ok(queue)
    }

    /// Drop the queue once its last consumer is gone and nothing is left in it.
    fn release_consumer(&self, name: &str, queue: &Arc<Queue>) {
        let Ok(mut queues) = self.queues.lock() else {
            return;
        };
        if queue.consumers.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        let idle = queue
            .state
            .lock()
            .map(|s| s.ready.is_empty() && s.unacked.is_empty())
            .unwrap_or(false);
        let bound = self
            .bindings
            .lock()
            .map(|b| b.values().any(|qs| qs.contains(name)))
            .unwrap_or(true);
        let same = queues.get(name).is_some_and(|q| Arc::ptr_eq(q, queue));
        if idle && !bound && same {
            queues.remove(name);
            trace!(queue = name, "idle queue dropped");
        }
    }

    fn settle(&self, queue: &str, tag: &str) -> Result<StoredMessage, BrokerError> {
        let unknown = || BrokerError::UnknownDelivery {
            queue: queue.to_string(),
            tag: tag.to_string(),
        };
        let q = self.existing(queue).ok_or_else(unknown)?;
        let mut state = lock(&q.state)?;
        state.unacked.remove(tag).ok_or_else(unknown)
    }
}

#[async_trait]
impl Acknowledger for Inner {
    async fn ack(&self, queue: &str, tag: &str) -> Result<(), BrokerError> {
        self.settle(queue, tag)?;
        trace!(queue, tag, "ack");
        Ok(())
    }

    async fn nack(&self, queue: &str, tag: &str, requeue: bool) -> Result<(), BrokerError> {
        let message = self.settle(queue, tag)?;
        trace!(queue, tag, requeue, "nack");
        if requeue {
            self.enqueue(queue, message, true)?;
        }
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, tag: &str) -> Result<(), BrokerError> {
        let message = self.settle(queue, tag)?;
        trace!(queue, tag, "dead-letter");
        self.enqueue(
            &dead_letter_queue(queue),
            StoredMessage {
                body: message.body,
                delivery_count: 0,
            },
            false,
        )
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError> {
        let targets: Vec<String> = {
            let bindings = lock(&self.inner.bindings)?;
            match bindings.get(destination) {
                Some(queues) if !queues.is_empty() => queues.iter().cloned().collect(),
                _ => vec![destination.to_string()],
            }
        };

        for queue in targets {
            self.inner.enqueue(
                &queue,
                StoredMessage {
                    body: body.to_vec(),
                    delivery_count: 0,
                },
                false,
            )?;
        }
        Ok(())
    }

    async fn bind(&self, queue: &str, destination: &str) -> Result<(), BrokerError> {
        self.inner.queue(queue)?;
        lock(&self.inner.bindings)?
            .entry(destination.to_string())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        Ok(Box::new(InMemoryConsumer {
            name: queue.to_string(),
            queue: self.inner.attach_consumer(queue)?,
            inner: self.inner.clone(),
        }))
    }
}

struct InMemoryConsumer {
    name: String,
    queue: Arc<Queue>,
    inner: Arc<Inner>,
}

impl InMemoryConsumer {
    fn try_take(&self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = lock(&self.queue.state)?;
        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };

        message.delivery_count += 1;
        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed).to_string();
        let delivery = Delivery::new(
            self.name.clone(),
            tag.clone(),
            message.body.clone(),
            message.delivery_count,
            self.inner.clone(),
        );
        state.unacked.insert(tag, message);
        Ok(Some(delivery))
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.inner.release_consumer(&self.name, &self.queue);
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let queue = self.queue.clone();
        loop {
            // Register interest before checking so a publish in between is not missed.
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take() {
                Ok(Some(delivery)) => return Some(Ok(delivery)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }

            notified.await;
        }
    }
}
