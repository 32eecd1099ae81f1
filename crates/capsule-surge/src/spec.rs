//! The project specification's logical schema (`spec.md` §6 "Project
//! specification"). Parsed with `capsule_core::config::{load, parse}`
//! from a TOML document; the grammar of any particular file format is
//! out of scope, only this logical shape is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub project: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSpec>,
    #[serde(default)]
    pub fabric: FabricConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub snapshots: SnapshotsConfig,
}

/// Sentinel value for `services.<name>.capsule` meaning "a capsule with
/// an empty rootfs, no base image" (`spec.md` §4.9 step 4).
pub const BASE_CAPSULE: &str = "<base>";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub image: Option<String>,
    pub build: Option<capsule_build::BuildSpec>,
    pub capsule: Option<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

impl ServiceSpec {
    /// "Exactly one of `image`, `build`, or `capsule` is required"
    /// (`spec.md` §6).
    pub fn validate(&self, name: &str) -> Result<(), String> {
        let present = [self.image.is_some(), self.build.is_some(), self.capsule.is_some()]
            .iter()
            .filter(|b| **b)
            .count();
        if present != 1 {
            return Err(format!(
                "service {name:?} must set exactly one of image, build, or capsule (found {present})"
            ));
        }
        if let Some(capsule) = &self.capsule {
            if capsule != BASE_CAPSULE {
                return Err(format!("service {name:?}: unsupported capsule value {capsule:?}, only \"<base>\" is"));
            }
        }
        for port in &self.ports {
            if !port.contains(':') {
                return Err(format!("service {name:?}: port {port:?} is not \"host:container\""));
            }
        }
        for volume in &self.volumes {
            if !volume.contains(':') {
                return Err(format!("service {name:?}: volume {volume:?} is not \"src:dst\""));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Bridge,
    Host,
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(rename = "type")]
    pub kind: NetworkType,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub driver: String,
    pub size: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FabricConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub node_id: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default = "default_true")]
    pub encryption: bool,
    #[serde(default = "default_true")]
    pub service_discovery: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_bind_port() -> u16 {
    4433
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: None,
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            encryption: true,
            service_discovery: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_resolver_port")]
    pub port: u16,
    pub domain: Option<String>,
}

fn default_resolver_port() -> u16 {
    5353
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_resolver_port(),
            domain: None,
        }
    }
}

impl ResolverConfig {
    /// `"<project>.local"` when no explicit domain is set (`spec.md` §6).
    pub fn domain_for(&self, project: &str) -> String {
        self.domain.clone().unwrap_or_else(|| format!("{project}.local"))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub filesystem: Option<String>,
    #[serde(default)]
    pub retention: capsule_policy::RetentionPolicy,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub named_snapshots: Vec<capsule_policy::NamedSnapshotSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggersConfig {
    #[serde(default)]
    pub timers: Vec<capsule_policy::TimerTrigger>,
    #[serde(default)]
    pub on_file_changes: Option<capsule_policy::FileChangeTrigger>,
}

impl ProjectSpec {
    /// Validate every service and surface the first violation
    /// (`spec.md` §7 `InvalidSpec`).
    pub fn validate(&self) -> Result<(), String> {
        if self.project.trim().is_empty() {
            return Err("project name must not be empty".into());
        }
        for (name, service) in &self.services {
            service.validate(name)?;
            for dep in &service.depends_on {
                if !self.services.contains_key(dep) {
                    return Err(format!("service {name:?} depends_on unknown service {dep:?}"));
                }
            }
        }
        Ok(())
    }

    pub fn default_node_id(&self, ts: i64) -> String {
        format!("node-{ts}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> ProjectSpec {
        capsule_core::config::parse(
            r#"
            project = "demo"

            [services.web]
            image = "nginx:latest"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn parses_minimal_spec() {
        let spec = base_spec();
        assert_eq!(spec.project, "demo");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_service_with_no_source() {
        let mut spec = base_spec();
        spec.services.get_mut("web").unwrap().image = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_service_with_two_sources() {
        let mut spec = base_spec();
        spec.services.get_mut("web").unwrap().capsule = Some(BASE_CAPSULE.into());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut spec = base_spec();
        spec.services.get_mut("web").unwrap().depends_on = vec!["ghost".into()];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn resolver_domain_defaults_to_project_local() {
        let config = ResolverConfig::default();
        assert_eq!(config.domain_for("demo"), "demo.local");
    }
}
