//! Hosted store access.
//!
//! The machines table lives in a hosted Postgres-style service consumed
//! through three operations: a bulk read, a batch upsert, and a change-event
//! subscription. [`MachineStore`] is the seam between aurod and that service,
//! which also allows the store to be mocked for testing.

mod realtime;
mod rest;

pub use realtime::RealtimeConfig;
pub use rest::RestStore;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::machine::Machine;
use crate::machine::StatusUpdate;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Response { status: u16, body: String },

    #[error("failed to decode store payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid store api key: {0}")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),

    #[error("realtime connection failed: {0}")]
    Realtime(String),
}

/// A committed change to the machines table, as delivered by the store's
/// change feed.
///
/// Delete payloads carry only the replica identity of the removed row, so
/// the variant holds the id rather than a full record.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert { new: Machine },
    Update { new: Machine },
    Delete { id: i64 },
}

/// Handle to an active change-event subscription.
///
/// Events are delivered in per-row commit order. Dropping the subscription
/// (or calling [`close`](Subscription::close)) releases the underlying
/// connection; `close` is idempotent.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<ChangeEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Receive the next change event, or `None` once the feed has shut down.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Stop the feed and release the connection.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Operations aurod needs from the hosted store.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Fetch every machine row, ordered by id.
    async fn fetch_all(&self) -> Result<Vec<Machine>, StoreError>;

    /// Submit one batch of status patches, keyed by id. Existing rows are
    /// updated in place; the batch never creates rows in this system's usage.
    async fn upsert(&self, updates: &[StatusUpdate]) -> Result<(), StoreError>;

    /// Open a change-event subscription on the machines table.
    async fn subscribe(&self) -> Result<Subscription, StoreError>;
}

/// Mock store for testing.
#[cfg(test)]
#[derive(Default)]
pub struct MockStore {
    pub machines: std::sync::Mutex<Vec<Machine>>,
    pub upserts: std::sync::Mutex<Vec<Vec<StatusUpdate>>>,
    pub fetch_calls: std::sync::atomic::AtomicUsize,
    pub fail_fetch: std::sync::Mutex<Option<String>>,
    events_tx: std::sync::Mutex<Option<mpsc::Sender<ChangeEvent>>>,
}

#[cfg(test)]
impl MockStore {
    pub fn with_machines(machines: Vec<Machine>) -> Self {
        Self {
            machines: std::sync::Mutex::new(machines),
            ..Self::default()
        }
    }

    pub fn failing_fetch(message: &str) -> Self {
        Self {
            fail_fetch: std::sync::Mutex::new(Some(message.to_string())),
            ..Self::default()
        }
    }

    pub fn upsert_batches(&self) -> usize {
        self.upserts.lock().unwrap().len()
    }

    /// Deliver a change event to the subscriber, waiting for the
    /// subscription to be established first.
    pub async fn send_event(&self, event: ChangeEvent) {
        let tx = loop {
            let tx = self.events_tx.lock().unwrap().clone();
            match tx {
                Some(tx) => break tx,
                None => tokio::task::yield_now().await,
            }
        };
        tx.send(event).await.expect("subscriber gone");
    }
}

#[cfg(test)]
#[async_trait]
impl MachineStore for MockStore {
    async fn fetch_all(&self) -> Result<Vec<Machine>, StoreError> {
        self.fetch_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if let Some(message) = self.fail_fetch.lock().unwrap().clone() {
            return Err(StoreError::Response {
                status: 503,
                body: message,
            });
        }

        Ok(self.machines.lock().unwrap().clone())
    }

    async fn upsert(&self, updates: &[StatusUpdate]) -> Result<(), StoreError> {
        self.upserts.lock().unwrap().push(updates.to_vec());
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(64);
        *self.events_tx.lock().unwrap() = Some(tx);
        Ok(Subscription::new(rx, None))
    }
}
