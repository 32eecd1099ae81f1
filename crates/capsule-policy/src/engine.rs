//! The Snapshot Policy Engine (C10 of `spec.md`): ties timers,
//! operation hooks, and retention together over one capsule's
//! [`SnapshotEngine`] (§4.10).

use std::collections::BTreeMap;
use std::sync::Arc;

use capsule_core::time::Timestamp;
use capsule_core::{log_info, Scope};
use capsule_runtime::CapsuleRuntime;
use capsule_snapshot::{Snapshot, SnapshotEngine};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::named::NamedSnapshotSpec;
use crate::retention::{prune, RetentionPolicy};
use crate::triggers::{OperationTrigger, TimerTrigger};

struct TimerState {
    trigger: TimerTrigger,
    last_fired: Option<Timestamp>,
}

/// Drives `spec.md` §4.10 for one capsule: registered timers and named
/// operation hooks decide *when* to call
/// [`SnapshotEngine::take`]; [`Self::apply_retention`] decides what
/// to keep afterward. Every capsule a daemon manages gets its own
/// `PolicyEngine` instance, matching the per-scope-lock discipline
/// `spec.md` §5 asks for elsewhere in this platform.
pub struct PolicyEngine {
    capsule_id: String,
    snapshot_engine: Arc<SnapshotEngine>,
    retention: RetentionPolicy,
    timers: Mutex<Vec<TimerState>>,
    named: Mutex<Vec<NamedSnapshotSpec>>,
    history: Mutex<BTreeMap<String, Snapshot>>,
    scope: Scope,
}

impl PolicyEngine {
    pub fn new(capsule_id: impl Into<String>, snapshot_engine: Arc<SnapshotEngine>, retention: RetentionPolicy) -> Self {
        let capsule_id = capsule_id.into();
        Self {
            scope: Scope::new("capsule", capsule_id.clone()),
            capsule_id,
            snapshot_engine,
            retention,
            timers: Mutex::new(Vec::new()),
            named: Mutex::new(Vec::new()),
            history: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn register_timer(&self, trigger: TimerTrigger) {
        self.timers.lock().await.push(TimerState { trigger, last_fired: None });
    }

    pub async fn register_named(&self, spec: NamedSnapshotSpec) {
        self.named.lock().await.push(spec);
    }

    /// Check every registered timer against `now`; take a snapshot for
    /// each one that's due and advance its `last_fired` marker.
    /// Returns the snapshots taken, in registration order.
    pub async fn run_timers(&self, runtime: &CapsuleRuntime, now: Timestamp) -> Result<Vec<Snapshot>> {
        let mut taken = Vec::new();
        let mut timers = self.timers.lock().await;
        for state in timers.iter_mut() {
            if state.trigger.is_due(now, state.last_fired) {
                let snapshot = self
                    .snapshot_engine
                    .take(runtime, &self.capsule_id, None, false)
                    .await?;
                log_info!(&self.scope, taken_at = %snapshot.taken_at, "timer-triggered snapshot");
                self.remember(snapshot.clone()).await;
                taken.push(snapshot);
                state.last_fired = Some(now);
            }
        }
        Ok(taken)
    }

    /// `spec.md` §4.10 "operations (before-build, before-surge-up,
    /// before-update)": take a snapshot for every named spec bound to
    /// `operation` with `auto_create` set.
    pub async fn run_operation_hook(&self, runtime: &CapsuleRuntime, operation: OperationTrigger) -> Result<Vec<Snapshot>> {
        let specs: Vec<NamedSnapshotSpec> = self
            .named
            .lock()
            .await
            .iter()
            .filter(|s| s.trigger == operation && s.auto_create)
            .cloned()
            .collect();

        let mut taken = Vec::with_capacity(specs.len());
        for spec in specs {
            let snapshot = self
                .snapshot_engine
                .take(runtime, &self.capsule_id, Some(spec.name.clone()), spec.keep_forever)
                .await?;
            log_info!(&self.scope, name = %spec.name, operation = ?operation, "operation-triggered snapshot");
            self.remember(snapshot.clone()).await;
            taken.push(snapshot);
        }
        Ok(taken)
    }

    /// Apply retention to every snapshot this engine has taken and
    /// remembered, returning the ones that should be deleted from the
    /// CAS/snapshot store by the caller (this crate doesn't own
    /// deletion of CAS objects itself — that's `capsule-cas`'s `gc`).
    pub async fn apply_retention(&self) -> Vec<Snapshot> {
        let history = self.history.lock().await;
        let snapshots: Vec<Snapshot> = history.values().cloned().collect();
        let to_delete = prune(&self.retention, &snapshots);
        if !to_delete.is_empty() {
            log_info!(&self.scope, count = to_delete.len(), "retention sweep identified snapshots to delete");
        }
        to_delete
    }

    /// Drop deleted snapshots from this engine's in-memory history
    /// after the caller has actually reclaimed their CAS objects.
    pub async fn forget(&self, taken_at_keys: impl IntoIterator<Item = Timestamp>) {
        let mut history = self.history.lock().await;
        for key in taken_at_keys {
            history.retain(|_, s| s.taken_at != key);
        }
    }

    async fn remember(&self, snapshot: Snapshot) {
        self.history.lock().await.insert(snapshot.taken_at.to_rfc3339(), snapshot);
    }
}
