//! Quota records (`spec.md` §3).

use std::collections::BTreeMap;

use capsule_core::time::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Storage,
    Bandwidth,
}

/// Which scope a quota is attached to (`spec.md` §3). `scope_id`
/// disambiguates instances of the same kind (e.g. which user).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "scope_id")]
pub enum Scope {
    User(String),
    Namespace(String),
    Cluster(String),
    Node(String),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::User(id) => write!(f, "user:{id}"),
            Scope::Namespace(id) => write!(f, "namespace:{id}"),
            Scope::Cluster(id) => write!(f, "cluster:{id}"),
            Scope::Node(id) => write!(f, "node:{id}"),
        }
    }
}

/// A single resource's limit bookkeeping within a quota.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Limit {
    pub hard: u64,
    pub used: u64,
    /// Crossing this (if set) emits a warning event rather than a
    /// denial (`spec.md` §4.7).
    pub soft: Option<u64>,
}

impl Limit {
    pub fn new(hard: u64) -> Self {
        Self {
            hard,
            used: 0,
            soft: None,
        }
    }

    pub fn with_soft(mut self, soft: u64) -> Self {
        self.soft = Some(soft);
        self
    }
}

/// `spec.md` §3's `Quota`. Invariant: `used <= hard` outside the
/// critical section of an allocation ([`crate::manager::QuotaManager`]
/// is the only code that mutates `limits`, and does so atomically).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quota {
    pub name: String,
    pub scope: Scope,
    pub limits: BTreeMap<ResourceKind, Limit>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Quota {
    pub fn new(name: impl Into<String>, scope: Scope, limits: BTreeMap<ResourceKind, Limit>) -> Self {
        let now = capsule_core::time::now();
        Self {
            name: name.into(),
            scope,
            limits,
            created_at: now,
            updated_at: now,
        }
    }
}
