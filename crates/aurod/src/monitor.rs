//! Live in-memory mirror of the machines table.
//!
//! The monitor performs one bulk load at startup, then keeps the mirror
//! eventually consistent by merging the store's change events. It also owns
//! the status simulator's lifetime, starting it on activation and stopping
//! it on deactivation. The mirror is published as an `ArcSwap` snapshot:
//! readers load the `Arc`, the monitor task is the only writer.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::machine::Machine;
use crate::simulator::SimulatorHandle;
use crate::simulator::StatusSimulator;
use crate::store::ChangeEvent;
use crate::store::MachineStore;

/// Mirror of the machines table plus load-state flags, as served to the
/// presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorState {
    pub machines: Vec<Machine>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for MirrorState {
    fn default() -> Self {
        Self {
            machines: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

/// Shared handle to the published mirror snapshot.
pub type Mirror = Arc<ArcSwap<MirrorState>>;

/// Live view of the machines table.
pub struct MachineMonitor;

impl MachineMonitor {
    /// Activate the monitor: start the simulator (when a period is given),
    /// bulk-load the table, then follow change events until stopped.
    ///
    /// A bulk-load failure is terminal for the view: the error is published
    /// in the mirror, no subscription is opened, and there is no automatic
    /// retry. Staleness of the background refresh, by contrast, is invisible
    /// here; failed cycles are the simulator's concern.
    pub fn start(store: Arc<dyn MachineStore>, simulator_period: Option<Duration>) -> MonitorHandle {
        let mirror: Mirror = Arc::new(ArcSwap::from_pointee(MirrorState::default()));

        let simulator = simulator_period.map(|period| {
            info!("starting status simulator, period {:?}", period);
            StatusSimulator::start(Arc::clone(&store), period)
        });

        let task = tokio::spawn(Self::run(Arc::clone(&store), Arc::clone(&mirror)));

        MonitorHandle {
            mirror,
            task: Some(task),
            simulator,
        }
    }

    async fn run(store: Arc<dyn MachineStore>, mirror: Mirror) {
        let machines = match store.fetch_all().await {
            Ok(machines) => machines,
            Err(e) => {
                warn!("bulk load failed: {}", e);
                mirror.store(Arc::new(MirrorState {
                    machines: Vec::new(),
                    loading: false,
                    error: Some(e.to_string()),
                }));
                return;
            }
        };

        info!("bulk load complete: {} machines", machines.len());
        mirror.store(Arc::new(MirrorState {
            machines,
            loading: false,
            error: None,
        }));

        let mut subscription = match store.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("subscribe failed, mirror will go stale: {}", e);
                return;
            }
        };

        while let Some(event) = subscription.next_event().await {
            let mut next = MirrorState::clone(&mirror.load());
            apply_event(&mut next.machines, event);
            mirror.store(Arc::new(next));
        }
    }
}

/// Merge one change event into the mirror's machine list.
///
/// Updates replace the matching row in place, preserving order; an update
/// (or insert) for an unseen id appends, which makes redundant delivery of
/// the same row idempotent. The store gives no origin tag, so events caused
/// by our own simulator take the same path as everyone else's.
fn apply_event(machines: &mut Vec<Machine>, event: ChangeEvent) {
    match event {
        ChangeEvent::Insert { new } | ChangeEvent::Update { new } => {
            debug!("machine {} -> {}", new.id, new.status);
            match machines.iter_mut().find(|m| m.id == new.id) {
                Some(slot) => *slot = new,
                None => machines.push(new),
            }
        }
        ChangeEvent::Delete { id } => {
            debug!("machine {} removed", id);
            machines.retain(|m| m.id != id);
        }
    }
}

/// Handle returned by [`MachineMonitor::start`].
///
/// Dropping (or stopping) cancels the monitor task, releases the
/// subscription, and stops the simulator. Safe to call at any point in the
/// lifecycle, including before the bulk load has finished.
pub struct MonitorHandle {
    mirror: Mirror,
    task: Option<JoinHandle<()>>,
    simulator: Option<SimulatorHandle>,
}

impl MonitorHandle {
    /// Current mirror snapshot. Cheap: clones the `Arc`.
    pub fn snapshot(&self) -> Arc<MirrorState> {
        self.mirror.load_full()
    }

    /// Shared mirror handle for the API layer.
    pub fn mirror(&self) -> Mirror {
        Arc::clone(&self.mirror)
    }

    /// Deactivate the view. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(mut simulator) = self.simulator.take() {
            simulator.stop();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineStatus;
    use crate::store::MockStore;
    use chrono::Utc;

    fn machine(id: i64, status: MachineStatus) -> Machine {
        Machine {
            id,
            kind: "washer".to_string(),
            location: "Aisle 1".to_string(),
            status,
            updated_at: Utc::now(),
        }
    }

    async fn wait_until(handle: &MonitorHandle, predicate: impl Fn(&MirrorState) -> bool) {
        for _ in 0..1000 {
            if predicate(&handle.snapshot()) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("mirror never reached expected state: {:?}", handle.snapshot());
    }

    #[test]
    fn test_update_replaces_matching_id_in_place() {
        let mut machines = vec![
            machine(1, MachineStatus::Idle),
            machine(2, MachineStatus::Idle),
        ];

        apply_event(
            &mut machines,
            ChangeEvent::Update {
                new: machine(2, MachineStatus::Maintenance),
            },
        );

        assert_eq!(machines.len(), 2);
        assert_eq!(machines[0].id, 1);
        assert_eq!(machines[0].status, MachineStatus::Idle);
        assert_eq!(machines[1].id, 2);
        assert_eq!(machines[1].status, MachineStatus::Maintenance);
    }

    #[test]
    fn test_merge_is_idempotent_under_redundant_updates() {
        let mut machines = vec![machine(1, MachineStatus::Idle)];

        let update = ChangeEvent::Update {
            new: machine(1, MachineStatus::InUse),
        };
        apply_event(&mut machines, update.clone());
        apply_event(&mut machines, update);

        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].status, MachineStatus::InUse);
    }

    #[test]
    fn test_insert_appends_and_delete_removes() {
        let mut machines = vec![machine(1, MachineStatus::Idle)];

        apply_event(
            &mut machines,
            ChangeEvent::Insert {
                new: machine(2, MachineStatus::Idle),
            },
        );
        assert_eq!(machines.len(), 2);

        apply_event(&mut machines, ChangeEvent::Delete { id: 1 });
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].id, 2);

        // Deleting an unknown id is a no-op.
        apply_event(&mut machines, ChangeEvent::Delete { id: 99 });
        assert_eq!(machines.len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_loads_then_merges_events() {
        let store = Arc::new(MockStore::with_machines(vec![
            machine(1, MachineStatus::Idle),
            machine(2, MachineStatus::Idle),
        ]));
        let mut handle = MachineMonitor::start(store.clone(), None);

        wait_until(&handle, |state| !state.loading).await;
        assert_eq!(handle.snapshot().machines.len(), 2);
        assert!(handle.snapshot().error.is_none());

        store
            .send_event(ChangeEvent::Update {
                new: machine(2, MachineStatus::Maintenance),
            })
            .await;

        wait_until(&handle, |state| {
            state.machines[1].status == MachineStatus::Maintenance
        })
        .await;

        let state = handle.snapshot();
        assert_eq!(state.machines[0].id, 1);
        assert_eq!(state.machines[0].status, MachineStatus::Idle);
        assert_eq!(state.machines[1].id, 2);

        handle.stop();
        handle.stop(); // idempotent
    }

    #[tokio::test]
    async fn test_bulk_load_failure_is_published_not_retried() {
        let store = Arc::new(MockStore::failing_fetch("network timeout"));
        let handle = MachineMonitor::start(store.clone(), None);

        wait_until(&handle, |state| !state.loading).await;

        let state = handle.snapshot();
        assert!(state.machines.is_empty());
        assert!(state.error.as_ref().unwrap().contains("network timeout"));

        // One fetch, no retry loop.
        tokio::task::yield_now().await;
        assert_eq!(
            store.fetch_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_starts_and_stops_the_simulator() {
        let store = Arc::new(MockStore::with_machines(vec![machine(
            1,
            MachineStatus::Idle,
        )]));
        let mut handle =
            MachineMonitor::start(store.clone(), Some(Duration::from_secs(45 * 60)));

        wait_until(&handle, |state| !state.loading).await;

        // The simulator's immediate cycle lands an upsert batch.
        for _ in 0..100 {
            if store.upsert_batches() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.upsert_batches(), 1);

        handle.stop();
    }
}
