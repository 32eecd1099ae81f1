//! Instant rollback (`spec.md` §4.6 "Instant rollback").

use std::time::Duration;

use capsule_core::{log_info, Scope};
use capsule_runtime::CapsuleRuntime;

use crate::engine::SnapshotEngine;
use crate::error::Result;
use crate::snapshot::Snapshot;

/// Stop the current instance, restore `target`, and restart — taking
/// a fresh backup snapshot first so the rollback itself can be undone
/// (`spec.md` §4.6: "A fresh backup snapshot is taken before
/// destructive rollback to enable undo").
pub async fn rollback_to(
    runtime: &CapsuleRuntime,
    engine: &SnapshotEngine,
    capsule_id: &str,
    target: &Snapshot,
    grace: Duration,
) -> Result<Snapshot> {
    let scope = Scope::new("capsule", capsule_id.to_string());

    let backup = engine.take(runtime, capsule_id, Some(format!("pre-rollback-{}", target.taken_at)), true).await?;
    log_info!(&scope, backup_taken_at = %backup.taken_at, "backup snapshot taken before rollback");

    runtime.stop(capsule_id, grace).await?;

    let upper_dir = runtime.reprepare_rootfs(capsule_id).await?;
    engine.restore_filesystem(target, &upper_dir).await?;

    runtime.start(capsule_id).await?;
    log_info!(&scope, restored_taken_at = %target.taken_at, "rollback complete");

    Ok(backup)
}
