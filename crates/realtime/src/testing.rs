//! Scripted connection double shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::connection::{Connection, ConnectionError, ConnectionHandle};

#[derive(Default)]
pub(crate) struct RecordingConnection {
    sent: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
    stall: AtomicBool,
    closed: AtomicBool,
    written: Notify,
}

impl RecordingConnection {
    pub(crate) fn pair() -> (Arc<Self>, ConnectionHandle) {
        let conn = Arc::new(Self::default());
        let handle = ConnectionHandle::new(conn.clone());
        (conn, handle)
    }

    pub(crate) fn handle() -> ConnectionHandle {
        Self::pair().1
    }

    pub(crate) fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stall_writes(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` frames were written.
    pub(crate) async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let written = self.written.notified();
                tokio::pin!(written);
                written.as_mut().enable();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                written.await;
            }
        })
        .await
        .expect("frames not written in time");
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn send(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) || self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.sent.lock().unwrap().push(payload.to_vec());
        self.written.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
