//! `surgectl`: applies a project spec's services against a local
//! capsule platform installation (`spec.md` §4.9, §6).
//!
//! Unlike `capsuled`, `surgectl` owns no long-lived node: it wires up
//! its own private CAS, image store, build cache, and capsule runtime
//! under `--data-dir`, binds its own fabric endpoint for the project,
//! and exits once the requested operation completes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use capsule_build::{BuildCache, Builder, SubprocessExecutor};
use capsule_cas::Store as CasStore;
use capsule_image::{HttpPuller, ImageStore};
use capsule_quota::QuotaManager;
use capsule_runtime::CapsuleRuntime;
use capsule_surge::{ProjectSpec, Surge};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "surgectl", about = "Apply a project spec's services")]
struct Args {
    /// Path to the project spec's TOML document.
    #[arg(long, default_value = "capsule-project.toml")]
    file: PathBuf,

    /// Directory this invocation stores its CAS, build cache, and
    /// capsule rootfs trees under.
    #[arg(long, default_value = "/var/lib/capsule-surge")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the project's services up in dependency order.
    Up,
    /// Stop the project's services in reverse dependency order (SIGTERM).
    Down,
    /// Stop the project's services immediately (SIGKILL).
    Kill,
}

#[tokio::main]
async fn main() -> Result<()> {
    capsule_core::logging::install_subscriber();
    let args = Args::parse();

    let spec: ProjectSpec = capsule_core::config::load(&args.file)
        .with_context(|| format!("loading project spec {}", args.file.display()))?;

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data directory {}", args.data_dir.display()))?;

    let cas = CasStore::open(args.data_dir.join("cas")).context("opening CAS store")?;
    let build_cache = BuildCache::open(args.data_dir.join("build-cache.json"))
        .await
        .context("opening build cache")?;
    let builder = Arc::new(Builder::new(cas.clone(), build_cache, Arc::new(SubprocessExecutor)));
    let image_store = Arc::new(ImageStore::new(cas.clone(), Arc::new(HttpPuller::new())));
    let runtime = Arc::new(CapsuleRuntime::new(cas.clone(), args.data_dir.join("runtime")));
    let quota = Arc::new(QuotaManager::with_defaults().await);

    let surge = Surge::new(spec.project.clone(), cas, image_store, builder, runtime, quota);

    let result = match args.command {
        Command::Up => surge.up(&spec).await.map(|started| {
            for capsule_id in &started {
                println!("{capsule_id}");
            }
        }),
        Command::Down => surge.down(&spec).await,
        Command::Kill => surge.kill(&spec).await,
    };

    if let Err(err) = result {
        eprintln!("surgectl: {err}");
        std::process::exit(capsule_surge::exit_code(&err));
    }
    Ok(())
}
