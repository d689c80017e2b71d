//! Periodic machine-status refresh.
//!
//! Until real telemetry lands, machine statuses are simulated: every cycle
//! rewrites each row's status from a fixed categorical distribution and
//! stamps the write time. The resulting upserts flow back to every watcher
//! of the machines table, including our own monitor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::machine::random_status;
use crate::machine::StatusUpdate;
use crate::store::MachineStore;
use crate::store::StoreError;

/// Default refresh period.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(45 * 60);

/// Run one refresh cycle: read every machine, draw a fresh status for each,
/// and write the whole batch back as a single upsert keyed by id.
///
/// Returns the number of rows patched.
pub async fn refresh_statuses(store: &dyn MachineStore) -> Result<usize, StoreError> {
    let machines = store.fetch_all().await?;

    let updates: Vec<StatusUpdate> = machines
        .iter()
        .map(|machine| StatusUpdate {
            id: machine.id,
            status: random_status(),
            updated_at: Utc::now(),
        })
        .collect();

    store.upsert(&updates).await?;
    Ok(updates.len())
}

/// Recurring driver for [`refresh_statuses`].
pub struct StatusSimulator;

impl StatusSimulator {
    /// Start the refresh timer: one cycle immediately, then one per
    /// `period`. Each firing spawns an independent run, so a cycle that
    /// outlives the period overlaps the next rather than delaying it; the
    /// per-row upserts are last-write-wins, so overlap is harmless.
    ///
    /// Cycle failures are logged and swallowed here; the next tick always
    /// fires.
    pub fn start(store: Arc<dyn MachineStore>, period: Duration) -> SimulatorHandle {
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);

            loop {
                ticker.tick().await;

                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    match refresh_statuses(store.as_ref()).await {
                        Ok(count) => debug!("refreshed {} machine statuses", count),
                        Err(e) => warn!("status refresh cycle failed: {}", e),
                    }
                });
            }
        });

        SimulatorHandle { timer: Some(timer) }
    }
}

/// Cancellation handle for the refresh timer.
///
/// Stopping prevents future cycles from starting; a cycle already in flight
/// runs to completion and its writes still land in the store.
pub struct SimulatorHandle {
    timer: Option<JoinHandle<()>>,
}

impl SimulatorHandle {
    /// Stop future cycles. Idempotent.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SimulatorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
