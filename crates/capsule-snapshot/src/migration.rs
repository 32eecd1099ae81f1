//! Live migration (`spec.md` §4.6 "Live migration pipeline").
//!
//! Source and target are both modeled as `CapsuleRuntime` handles the
//! caller owns — in the single-node daemon these are the same runtime
//! under different capsule ids; across nodes the target runtime lives
//! behind the fabric and the orchestrator drives this pipeline with a
//! local stand-in, per `spec.md` §4.9's "forward a deployment request
//! over the Fabric" note.

use std::time::Duration;

use capsule_core::{log_info, log_warn, Scope};
use capsule_runtime::{CapsuleConfig, CapsuleRuntime};

use crate::engine::SnapshotEngine;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// A caller-supplied check that the migrated capsule is actually
/// healthy before the source is torn down (`spec.md` §4.6 step 5:
/// "verify (health probe + steady-state criteria defined by the
/// orchestrator)").
pub trait HealthCheck: Send + Sync {
    fn verify(&self, target_capsule_id: &str) -> bool;
}

/// A health check that always passes, for callers with no probe of
/// their own (e.g. tests, or capsules with no defined readiness
/// signal).
pub struct AlwaysHealthy;

impl HealthCheck for AlwaysHealthy {
    fn verify(&self, _target_capsule_id: &str) -> bool {
        true
    }
}

pub struct MigrationOutcome {
    pub target_capsule_id: String,
    pub final_snapshot: Snapshot,
}

/// Runs `spec.md` §4.6's six-step pipeline. Pre-copy (step 1) is
/// modeled as repeated filesystem snapshots taken while the source
/// keeps running, narrowing the delta the final (post-freeze)
/// snapshot has to transfer; since this core has no incremental-diff
/// transport, each pre-copy pass re-snapshots the full filesystem and
/// only the last, post-freeze snapshot is actually used to restore —
/// the earlier passes exist to warm the CAS's already-deduplicating
/// storage (`spec.md` §3 "CAS") so the final transfer mostly hits
/// digests the target already has.
pub async fn migrate(
    source_runtime: &CapsuleRuntime,
    target_runtime: &CapsuleRuntime,
    engine: &SnapshotEngine,
    source_capsule_id: &str,
    target_config: CapsuleConfig,
    precopy_passes: u32,
    health: &dyn HealthCheck,
) -> Result<MigrationOutcome> {
    let scope = Scope::new("capsule", source_capsule_id.to_string());

    for pass in 0..precopy_passes {
        log_info!(&scope, pass, "live migration pre-copy pass");
        let _ = engine.take(source_runtime, source_capsule_id, None, false).await;
    }

    source_runtime
        .freeze(source_capsule_id)
        .await
        .map_err(|e| Error::SnapshotFailed(source_capsule_id.to_string(), e.to_string()))?;

    let final_snapshot = match engine.take(source_runtime, source_capsule_id, None, false).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            let _ = source_runtime.thaw(source_capsule_id).await;
            return Err(err);
        }
    };

    let target_capsule_id = target_runtime
        .create(target_config)
        .await
        .map_err(|e| Error::RestoreFailed(source_capsule_id.to_string(), e.to_string()))?;

    let restore_result = restore_onto(engine, target_runtime, &target_capsule_id, &final_snapshot).await;

    if let Err(err) = restore_result {
        log_warn!(&scope, error = %err, "restore failed, resuming source");
        let _ = source_runtime.thaw(source_capsule_id).await;
        return Err(err);
    }

    if !health.verify(&target_capsule_id) {
        log_warn!(&scope, "target failed health verification, discarding restore and resuming source");
        let _ = target_runtime.stop(&target_capsule_id, Duration::from_secs(5)).await;
        let _ = source_runtime.thaw(source_capsule_id).await;
        return Err(Error::RestoreFailed(
            source_capsule_id.to_string(),
            "target failed health verification".into(),
        ));
    }

    source_runtime
        .stop(source_capsule_id, Duration::from_secs(10))
        .await
        .map_err(|e| Error::RestoreFailed(source_capsule_id.to_string(), e.to_string()))?;

    log_info!(&scope, target = %target_capsule_id, "live migration complete");
    Ok(MigrationOutcome {
        target_capsule_id,
        final_snapshot,
    })
}

async fn restore_onto(
    engine: &SnapshotEngine,
    target_runtime: &CapsuleRuntime,
    target_capsule_id: &str,
    snapshot: &Snapshot,
) -> Result<()> {
    let upper_dir = target_runtime.upper_rootfs(target_capsule_id).await?;
    engine.restore_filesystem(snapshot, &upper_dir).await?;
    target_runtime
        .start(target_capsule_id)
        .await
        .map_err(|e| Error::RestoreFailed(target_capsule_id.to_string(), e.to_string()))
}
