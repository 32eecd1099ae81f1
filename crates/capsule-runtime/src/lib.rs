//! Capsule Runtime (C4 of `spec.md`): creates/runs isolated processes
//! with namespaces, cgroups, and overlay rootfs. See `spec.md` §4.4, §8.

mod cgroup;
mod config;
mod error;
mod exec;
mod namespaces;
mod rootfs;
mod runtime;

pub use cgroup::Cgroup;
pub use config::{CapsuleConfig, CapsuleState, MountSpec, ResourceLimits};
pub use error::{Error, Result};
pub use rootfs::RootfsLayout;
pub use runtime::{CapsuleRuntime, DEFAULT_STOP_GRACE};
