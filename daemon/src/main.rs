//! `capsuled`: the per-node agent. Binds the fabric, owns this node's
//! CAS/image-store/build-cache/capsule-runtime/quota-manager, and
//! drives cluster membership (`spec.md` §1 "Data & control flow").

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use capsule_build::{BuildCache, Builder, SubprocessExecutor};
use capsule_cas::Store as CasStore;
use capsule_cluster::{Capacity, ClusterManager, DEFAULT_HEARTBEAT_TIMEOUT};
use capsule_core::{log_info, log_warn, Scope};
use capsule_fabric::Fabric;
use capsule_image::{HttpPuller, ImageStore};
use capsule_quota::QuotaManager;
use capsule_runtime::CapsuleRuntime;
use clap::Parser;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};

/// How often this node scans for peers that stopped heartbeating
/// (`spec.md` §4.8).
const FAILURE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "capsuled", about = "Per-node capsule platform agent")]
struct Args {
    /// Directory this node stores its CAS, build cache, and capsule
    /// rootfs trees under.
    #[arg(long, default_value = "/var/lib/capsule")]
    data_dir: String,

    /// This node's id; a random one is generated when absent.
    #[arg(long)]
    node_id: Option<String>,

    /// Address the fabric's QUIC endpoint binds to.
    #[arg(long, default_value = "0.0.0.0")]
    bind_address: String,

    /// Port the fabric's QUIC endpoint binds to (`spec.md` §6 default 4433).
    #[arg(long, default_value_t = 4433)]
    bind_port: u16,

    /// Domain suffix this node's resolver answers for.
    #[arg(long, default_value = "cluster.local")]
    domain: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    capsule_core::logging::install_subscriber();
    let args = Args::parse();

    let data_dir = std::path::PathBuf::from(&args.data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let cas = CasStore::open(data_dir.join("cas")).context("opening CAS store")?;
    let build_cache = BuildCache::open(data_dir.join("build-cache.json"))
        .await
        .context("opening build cache")?;
    // Held for the lifetime of the process: future on-node operations
    // (builds, pulls) that arrive over the fabric's control channel
    // will be driven through these, alongside the runtime and quota
    // manager the Cluster Manager already uses directly.
    let builder = Arc::new(Builder::new(cas.clone(), build_cache, Arc::new(SubprocessExecutor)));
    let image_store = Arc::new(ImageStore::new(cas.clone(), Arc::new(HttpPuller::new())));
    let runtime = Arc::new(CapsuleRuntime::new(cas.clone(), data_dir.join("runtime")));
    let quota = Arc::new(QuotaManager::with_defaults().await);

    let node_id = args.node_id.unwrap_or_else(|| format!("node-{}", capsule_core::time::now().timestamp()));
    let bind_addr: SocketAddr = format!("{}:{}", args.bind_address, args.bind_port)
        .parse()
        .context("parsing bind address")?;

    let (fabric, mut inbox) = Fabric::bind(node_id.clone(), bind_addr, args.domain).await.context("binding fabric")?;
    let scope = Scope::new("daemon", node_id.clone());
    log_info!(&scope, address = %bind_addr, "fabric bound");

    let serve_handle = tokio::spawn(fabric.clone().serve());
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            log_info!(&Scope::new("daemon", "inbox"), dest = %message.dest_service, "application message received");
        }
    });

    let cluster = Arc::new(ClusterManager::new(
        node_id.clone(),
        local_capacity(),
        quota.clone(),
        runtime.clone(),
        fabric.clone(),
    ));

    // `builder` and `image_store` aren't driven from anywhere yet: this
    // node has no control channel for on-demand builds or pulls, only
    // the Cluster Manager's direct use of `runtime` and `quota`. Keep
    // them alive for the process lifetime so they're ready once one exists.
    let _builder = builder;
    let _image_store = image_store;

    log_info!(&scope, "node ready");
    let cluster_for_heartbeat = cluster.clone();
    let heartbeat_scope = scope.clone();
    let failure_check = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FAILURE_CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            match cluster_for_heartbeat.check_failures(DEFAULT_HEARTBEAT_TIMEOUT).await {
                Ok(failed) if !failed.is_empty() => {
                    log_warn!(&heartbeat_scope, count = failed.len(), "nodes marked failed this sweep");
                }
                Ok(_) => {}
                Err(err) => log_warn!(&heartbeat_scope, error = %err, "failure check errored"),
            }
        }
    });

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    select! {
        _ = sigterm.recv() => log_info!(&scope, "received SIGTERM, shutting down"),
        _ = sigint.recv() => log_info!(&scope, "received SIGINT, shutting down"),
    }

    failure_check.abort();
    serve_handle.abort();
    Ok(())
}

fn local_capacity() -> Capacity {
    Capacity {
        cpu_cores: std::thread::available_parallelism().map(|n| n.get() as f64).unwrap_or(1.0),
        memory_gb: 0.0,
        storage_gb: 0.0,
    }
}
