//! Named snapshot definitions (`spec.md` §6 `snapshots.named_snapshots`).

use serde::{Deserialize, Serialize};

use crate::triggers::OperationTrigger;

/// "Named snapshots may be opted out of retention (`keep forever`)"
/// (`spec.md` §4.10).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedSnapshotSpec {
    pub name: String,
    pub description: Option<String>,
    pub trigger: OperationTrigger,
    pub auto_create: bool,
    pub keep_forever: bool,
}
