//! The Orchestrator (C9 of `spec.md`): `up`/`down`/`kill` over a
//! declarative project spec (§4.9).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use capsule_build::Builder;
use capsule_cas::Store as CasStore;
use capsule_cluster::{Capacity, ClusterManager, PlacementConstraints, PlacementPolicy};
use capsule_core::{ids::random_key_32, log_info, log_warn, Scope};
use capsule_fabric::{Fabric, ServiceEndpoint};
use capsule_image::ImageStore;
use capsule_quota::QuotaManager;
use capsule_runtime::{CapsuleConfig, CapsuleRuntime, MountSpec, ResourceLimits, DEFAULT_STOP_GRACE};
use tokio::sync::Mutex;

use crate::build::build_rootfs_layer;
use crate::error::{Error, Result};
use crate::network::NetworkManager;
use crate::spec::{ProjectSpec, ServiceSpec, BASE_CAPSULE};
use crate::topo::{order_services, reverse_order_services};

/// Everything the orchestrator needs to run one project against one
/// node's local components. A node's `daemon` wires these up once and
/// can hand the same instances to several `Surge`s for several
/// projects; `surgectl` wires up a fresh, private set per invocation.
pub struct Surge {
    project: String,
    cas: CasStore,
    image_store: Arc<ImageStore>,
    builder: Arc<Builder>,
    runtime: Arc<CapsuleRuntime>,
    quota: Arc<QuotaManager>,
    networks: NetworkManager,
    fabric: Mutex<Option<Arc<Fabric>>>,
    cluster: Mutex<Option<Arc<ClusterManager>>>,
    scope: Scope,
}

impl Surge {
    pub fn new(
        project: impl Into<String>,
        cas: CasStore,
        image_store: Arc<ImageStore>,
        builder: Arc<Builder>,
        runtime: Arc<CapsuleRuntime>,
        quota: Arc<QuotaManager>,
    ) -> Self {
        let project = project.into();
        Self {
            networks: NetworkManager::new(&project),
            scope: Scope::new("surge", project.clone()),
            project,
            cas,
            image_store,
            builder,
            runtime,
            quota,
            fabric: Mutex::new(None),
            cluster: Mutex::new(None),
        }
    }

    /// `up(spec)` (`spec.md` §4.9).
    pub async fn up(&self, spec: &ProjectSpec) -> Result<Vec<String>> {
        spec.validate().map_err(Error::InvalidSpec)?;

        let cluster = self.ensure_fabric_and_cluster(spec).await?;

        self.networks.ensure_networks(&spec.networks).await;
        self.networks.ensure_volumes(&spec.volumes).await;

        let order = order_services(spec).map_err(Error::DependencyError)?;

        let mut started = Vec::with_capacity(order.len());
        for name in &order {
            let service = spec.services.get(name).expect("ordered from this spec's own services");
            let capsule_id = self.service_capsule_id(name);
            self.start_service(&cluster, name, &capsule_id, service).await?;
            started.push(capsule_id);
            log_info!(&self.scope, service = %name, "service started");
        }
        Ok(started)
    }

    /// `down(spec)`: SIGTERM, `depends_on` stopped in reverse order
    /// (`spec.md` §4.9).
    pub async fn down(&self, spec: &ProjectSpec) -> Result<()> {
        self.stop_all(spec, DEFAULT_STOP_GRACE).await
    }

    /// `kill(spec)`: SIGKILL (`spec.md` §4.9). `stop` escalates to
    /// SIGKILL once its grace period elapses, so a zero grace period
    /// is a SIGKILL from the caller's perspective.
    pub async fn kill(&self, spec: &ProjectSpec) -> Result<()> {
        self.stop_all(spec, Duration::ZERO).await
    }

    async fn stop_all(&self, spec: &ProjectSpec, grace: Duration) -> Result<()> {
        let order = reverse_order_services(spec).map_err(Error::DependencyError)?;
        for name in &order {
            let capsule_id = self.service_capsule_id(name);
            if let Err(err) = self.runtime.stop(&capsule_id, grace).await {
                log_warn!(&self.scope, service = %name, error = %err, "service failed to stop");
                return Err(Error::ServiceStopFailed(name.clone(), err.to_string()));
            }
            log_info!(&self.scope, service = %name, "service stopped");
        }
        Ok(())
    }

    fn service_capsule_id(&self, service_name: &str) -> String {
        format!("{}-{}", self.project, service_name)
    }

    /// `spec.md` §4.9 step 1: bind the fabric once per project (an
    /// already-bound fabric from a previous `up` is reused) and build
    /// the Cluster Manager over it.
    async fn ensure_fabric_and_cluster(&self, spec: &ProjectSpec) -> Result<Arc<ClusterManager>> {
        let mut cluster_guard = self.cluster.lock().await;
        if let Some(cluster) = cluster_guard.as_ref() {
            return Ok(cluster.clone());
        }

        let node_id = spec
            .fabric
            .node_id
            .clone()
            .unwrap_or_else(|| spec.default_node_id(capsule_core::time::now().timestamp()));
        let addr: SocketAddr = format!("{}:{}", spec.fabric.bind_address, spec.fabric.bind_port)
            .parse()
            .map_err(|e| Error::InvalidSpec(format!("invalid fabric bind address: {e}")))?;
        let domain = spec.resolver.domain_for(&spec.project);

        let (fabric, mut inbox) = Fabric::bind(node_id.clone(), addr, domain).await?;
        tokio::spawn(fabric.clone().serve());
        // Nothing in this node consumes application messages directly
        // yet; drain the inbox so a full channel never blocks delivery.
        tokio::spawn(async move { while inbox.recv().await.is_some() {} });

        *self.fabric.lock().await = Some(fabric.clone());

        let cluster = Arc::new(ClusterManager::new(
            node_id,
            Capacity {
                cpu_cores: num_cpus_estimate(),
                memory_gb: 0.0,
                storage_gb: 0.0,
            },
            self.quota.clone(),
            self.runtime.clone(),
            fabric,
        ));
        *cluster_guard = Some(cluster.clone());
        Ok(cluster)
    }

    async fn start_service(
        &self,
        cluster: &Arc<ClusterManager>,
        name: &str,
        capsule_id: &str,
        service: &ServiceSpec,
    ) -> Result<()> {
        let config = self.capsule_config_for(service, name).await?;

        cluster
            .schedule(
                capsule_id.to_string(),
                config,
                PlacementConstraints::default(),
                &PlacementPolicy::LeastLoaded,
                &[],
            )
            .await
            .map_err(|e| Error::ServiceStartFailed(name.to_string(), e.to_string()))?;

        self.runtime
            .start(capsule_id)
            .await
            .map_err(|e| Error::ServiceStartFailed(name.to_string(), e.to_string()))?;

        self.register_service(service, name).await?;
        Ok(())
    }

    /// Resolve `service`'s image/build/base-capsule source into a
    /// `CapsuleConfig` (`spec.md` §4.9 step 4).
    async fn capsule_config_for(&self, service: &ServiceSpec, name: &str) -> Result<CapsuleConfig> {
        let (layers, working_dir, user, entrypoint) = if let Some(image_ref) = &service.image {
            let manifest = self.image_store.resolve(image_ref).await?;
            let config_bytes = self.cas.get(manifest.config_digest).await?;
            let image_config: ImageConfig = serde_json::from_slice(&config_bytes).unwrap_or_default();
            (
                manifest.layers.into_iter().map(|l| l.digest).collect(),
                image_config.working_dir,
                image_config.user,
                image_config.entrypoint,
            )
        } else if let Some(build_spec) = &service.build {
            let layer = build_rootfs_layer(&self.builder, build_spec).await?;
            (vec![layer], "/".into(), "root".into(), default_entrypoint())
        } else if service.capsule.as_deref() == Some(BASE_CAPSULE) {
            // "synthesized manifest (empty layers, working dir /, user root)"
            (Vec::new(), "/".into(), "root".into(), default_entrypoint())
        } else {
            return Err(Error::InvalidSpec(format!("service {name:?} has no image, build, or capsule source")));
        };

        let mounts = service
            .volumes
            .iter()
            .filter_map(|mapping| mapping.split_once(':'))
            .map(|(source, destination)| MountSpec {
                source: source.into(),
                destination: destination.into(),
                read_only: false,
            })
            .collect();

        Ok(CapsuleConfig {
            hostname: name.chars().take(64).collect(),
            layers,
            working_dir,
            user,
            env: service.env.clone(),
            entrypoint,
            mounts,
            limits: ResourceLimits::default(),
            rootless: false,
        })
    }

    /// Register the service's first declared port (if any) in the
    /// fabric's service registry, so the resolver can answer lookups
    /// for it (`spec.md` §4.9 step 4, §4.5).
    async fn register_service(&self, service: &ServiceSpec, name: &str) -> Result<()> {
        let fabric = self.fabric.lock().await.clone().expect("bound in ensure_fabric_and_cluster");
        let port = service
            .ports
            .first()
            .and_then(|mapping| mapping.split_once(':'))
            .and_then(|(host, _container)| host.parse().ok())
            .unwrap_or(0);

        fabric
            .announce_service(ServiceEndpoint {
                name: name.to_string(),
                address: fabric.local_addr().map(|a| a.ip().to_string()).unwrap_or_default(),
                port,
                protocol: "tcp".into(),
                encryption_key: Some(random_key_32()),
            })
            .await;
        Ok(())
    }
}

fn default_entrypoint() -> Vec<String> {
    vec!["/bin/sh".into()]
}

/// Minimal image config blob read from `config_digest`
/// (`spec.md` §3's config object is opaque bytes; this is the small
/// logical shape this platform's own images use).
#[derive(serde::Deserialize)]
struct ImageConfig {
    #[serde(default = "default_entrypoint")]
    entrypoint: Vec<String>,
    #[serde(default = "default_working_dir")]
    working_dir: std::path::PathBuf,
    #[serde(default = "default_user")]
    user: String,
}

/// A `#[derive(Default)]` here would give `entrypoint = vec![]`, not
/// `default_entrypoint()` — derived `Default` calls each field's own
/// `Default::default()`, it does not run the `#[serde(default = "…")]`
/// functions. Blobs that parse as valid JSON but not this shape (an
/// OCI config array, any non-object) fall back to this impl, which
/// must match the per-field serde defaults or a fallback capsule would
/// get an empty entrypoint and fail `CapsuleConfig::validate()`.
impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            entrypoint: default_entrypoint(),
            working_dir: default_working_dir(),
            user: default_user(),
        }
    }
}

fn default_working_dir() -> std::path::PathBuf {
    "/".into()
}

fn default_user() -> String {
    "root".into()
}

/// Coarse local CPU count used as this node's advertised capacity when
/// `surgectl` stands up a brand-new node rather than joining an
/// existing one. The project spec's logical schema carries no
/// per-service resource request fields, so placement here only ever
/// filters on liveness, not on room.
fn num_cpus_estimate() -> f64 {
    std::thread::available_parallelism().map(|n| n.get() as f64).unwrap_or(1.0)
}
