//! Capsule configuration and the state machine (`spec.md` §3).

use std::collections::BTreeMap;
use std::path::PathBuf;

use capsule_core::Digest;
use serde::{Deserialize, Serialize};

/// `spec.md` §3's capsule state machine:
/// `Created -> Starting -> Running -> {Paused | Stopping} -> Stopped | Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleState {
    Created,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Failed,
}

impl CapsuleState {
    /// Whether `self -> next` is a legal transition per `spec.md` §3.
    pub fn can_transition_to(self, next: CapsuleState) -> bool {
        use CapsuleState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Paused)
                | (Running, Stopping)
                | (Paused, Running)
                | (Paused, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }
}

/// A single bind mount requested inside the capsule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MountSpec {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub read_only: bool,
}

/// Resource caps applied to the capsule's cgroup (`spec.md` §4.4 step 3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Bytes. `0` is forbidden (`spec.md` §4.4 invariants) — use `None`
    /// for "no cap" instead of `Some(0)`.
    pub memory_max_bytes: Option<u64>,
    /// cgroup v2 `cpu.max` quota in microseconds per 100ms period.
    pub cpu_quota_us: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_max_bytes: None,
            cpu_quota_us: None,
        }
    }
}

/// Everything needed to create a capsule (`spec.md` §3, §4.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapsuleConfig {
    pub hostname: String,
    pub layers: Vec<Digest>,
    pub working_dir: PathBuf,
    pub user: String,
    pub env: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub limits: ResourceLimits,
    /// Request a user namespace mapping a non-root outside identity
    /// (`spec.md` §4.4 "Rootless mode").
    pub rootless: bool,
}

impl CapsuleConfig {
    /// Validate invariants that must hold before `create` attempts any
    /// kernel object setup (`spec.md` §4.4: hostname <= 64 bytes,
    /// `memory.max = 0` forbidden).
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.hostname.len() > 64 {
            return Err(crate::error::Error::InvalidConfiguration(format!(
                "hostname {:?} exceeds 64 bytes",
                self.hostname
            )));
        }
        if self.hostname.is_empty() {
            return Err(crate::error::Error::InvalidConfiguration(
                "hostname must not be empty".into(),
            ));
        }
        if self.limits.memory_max_bytes == Some(0) {
            return Err(crate::error::Error::InvalidConfiguration(
                "memory.max = 0 is forbidden".into(),
            ));
        }
        if self.entrypoint.is_empty() {
            return Err(crate::error::Error::InvalidConfiguration(
                "entrypoint must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> CapsuleConfig {
        CapsuleConfig {
            hostname: "web".into(),
            layers: vec![],
            working_dir: "/".into(),
            user: "root".into(),
            env: BTreeMap::new(),
            entrypoint: vec!["/bin/sh".into()],
            mounts: vec![],
            limits: ResourceLimits::default(),
            rootless: false,
        }
    }

    #[test]
    fn rejects_oversized_hostname() {
        let mut config = base_config();
        config.hostname = "a".repeat(65);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_memory_max() {
        let mut config = base_config();
        config.limits.memory_max_bytes = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn state_machine_forbids_skipping_starting() {
        assert!(!CapsuleState::Created.can_transition_to(CapsuleState::Running));
        assert!(CapsuleState::Created.can_transition_to(CapsuleState::Starting));
        assert!(CapsuleState::Starting.can_transition_to(CapsuleState::Running));
    }
}
