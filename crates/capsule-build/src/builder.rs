//! The reproducible builder: `build(spec)` (`spec.md` §4.2).

use std::collections::BTreeMap;
use std::sync::Arc;

use capsule_cas::{ObjectKind, Store as CasStore};
use capsule_core::{log_info, log_warn, Digest, Scope};
use chrono::Utc;

use crate::cache::{BuildCache, BuildCacheEntry};
use crate::error::{Error, Result};
use crate::executor::BuildExecutor;
use crate::spec::{fingerprint, BuildSpec};

/// Minimal deterministic environment a build runs under before the
/// spec's own `env` overlays on top (`spec.md` §4.2 step 3, §4.2
/// "Determinism rules").
fn base_environment(build_dir: &std::path::Path) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("LC_ALL".into(), "C".into());
    env.insert("LANG".into(), "C".into());
    env.insert("TZ".into(), "UTC".into());
    env.insert("PATH".into(), "/usr/bin:/bin".into());
    env.insert("HOME".into(), build_dir.display().to_string());
    env
}

pub struct Builder {
    cas: CasStore,
    cache: BuildCache,
    executor: Arc<dyn BuildExecutor>,
}

impl Builder {
    pub fn new(cas: CasStore, cache: BuildCache, executor: Arc<dyn BuildExecutor>) -> Self {
        Self {
            cas,
            cache,
            executor,
        }
    }

    /// Run `build(spec)` end to end, returning each declared output's
    /// name and digest (`spec.md` §4.2).
    pub async fn build(&self, spec: &BuildSpec) -> Result<Vec<(String, Digest)>> {
        if spec.command.is_empty() {
            return Err(Error::InvalidBuildSpec("command must not be empty".into()));
        }

        let fp = fingerprint(spec);
        let scope = Scope::new("build", spec.name.clone());

        if let Some(entry) = self.cache.lookup(fp).await {
            if entry.success {
                log_info!(&scope, fingerprint = %fp, "build cache hit");
                return self.load_manifest(entry.output_digest).await;
            }
        }

        log_info!(&scope, fingerprint = %fp, "build cache miss, building from scratch");
        let started = std::time::Instant::now();
        let result = self.build_fresh(spec).await;
        let build_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok((manifest_digest, _)) => {
                self.cache
                    .insert(BuildCacheEntry {
                        input_fingerprint: fp,
                        output_digest: *manifest_digest,
                        taken_at: Utc::now(),
                        build_ms,
                        success: true,
                    })
                    .await?;
            }
            Err(_) => {
                self.cache
                    .insert(BuildCacheEntry {
                        input_fingerprint: fp,
                        output_digest: Digest::of(b""),
                        taken_at: Utc::now(),
                        build_ms,
                        success: false,
                    })
                    .await?;
            }
        }

        result.map(|(_, outputs)| outputs)
    }

    /// Steps 3-6 of `spec.md` §4.2: materialize an isolated build
    /// directory, execute the command, collect outputs into the CAS,
    /// and build the output manifest blob. Also used as the second
    /// pass of reproducibility validation (step 7), so it returns the
    /// manifest digest alongside the named outputs rather than just
    /// the outputs.
    async fn build_fresh(&self, spec: &BuildSpec) -> Result<(Digest, Vec<(String, Digest)>)> {
        let outputs = self.run_one_pass(spec).await?;

        if spec.reproducible {
            let second_pass = self.run_one_pass(spec).await?;
            for ((name, first), (_, second)) in outputs.iter().zip(second_pass.iter()) {
                if first != second {
                    return Err(Error::NonDeterministic {
                        name: name.clone(),
                        first: *first,
                        second: *second,
                    });
                }
            }
        }

        let manifest_digest = self.write_manifest(&outputs).await?;
        Ok((manifest_digest, outputs))
    }

    async fn run_one_pass(&self, spec: &BuildSpec) -> Result<Vec<(String, Digest)>> {
        let build_dir = tempfile::tempdir()?;
        let dir = build_dir.path();

        for input in &spec.inputs {
            if !self.cas.contains(input.digest).await {
                return Err(Error::DependencyNotFound {
                    role: input.role.clone(),
                    digest: input.digest,
                });
            }
            let bytes = self.cas.get(input.digest).await?;
            tokio::fs::write(dir.join(&input.role), bytes).await?;
        }

        let mut env = base_environment(dir);
        for (key, value) in &spec.env {
            env.insert(key.clone(), value.clone()); // spec env wins over defaults
        }

        let result = self.executor.execute(&spec.command, &env, dir).await?;
        if result.exit_code != 0 {
            return Err(Error::BuildFailed {
                status: result.exit_code,
            });
        }

        let mut outputs = Vec::with_capacity(spec.outputs.len());
        for declared in &spec.outputs {
            let path = dir.join(&declared.name);
            let digest = self.cas.put_path(&path, declared.kind).await?;
            outputs.push((declared.name.clone(), digest));
        }
        Ok(outputs)
    }

    /// Build output manifests use the `BUILD_OUTPUTS_v1` line-oriented
    /// text header format of `spec.md` §6 "Snapshot metadata": a
    /// header line followed by `key:value` lines, one per declared
    /// output, with digests in their printable `sha256:<hex>` form.
    async fn write_manifest(&self, outputs: &[(String, Digest)]) -> Result<Digest> {
        let mut sorted = outputs.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut text = String::from("BUILD_OUTPUTS_v1\n");
        for (name, digest) in &sorted {
            text.push_str(name);
            text.push(':');
            text.push_str(&digest.to_string());
            text.push('\n');
        }
        Ok(self
            .cas
            .put(text.into_bytes(), ObjectKind::Manifest)
            .await?)
    }

    async fn load_manifest(&self, manifest_digest: Digest) -> Result<Vec<(String, Digest)>> {
        let bytes = self.cas.get(manifest_digest).await?;
        let text = String::from_utf8_lossy(&bytes);
        let mut lines = text.lines();
        match lines.next() {
            Some("BUILD_OUTPUTS_v1") => {}
            other => {
                return Err(Error::ValidationFailed(format!(
                    "expected BUILD_OUTPUTS_v1 header, found {other:?}"
                )))
            }
        }
        let mut outputs = Vec::new();
        for line in lines {
            if let Some((name, digest)) = line.split_once(':') {
                let digest: Digest = digest
                    .parse()
                    .map_err(|_| Error::ValidationFailed(format!("corrupt manifest line {line:?}")))?;
                outputs.push((name.to_string(), digest));
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BuildInput, BuildOutput};
    use capsule_cas::Store;

    async fn fixture() -> (tempfile::TempDir, Builder) {
        let dir = tempfile::tempdir().unwrap();
        let cas = Store::open(dir.path().join("cas")).unwrap();
        let cache = BuildCache::open(dir.path().join("cache.json")).await.unwrap();
        let builder = Builder::new(cas, cache, Arc::new(crate::executor::SubprocessExecutor));
        (dir, builder)
    }

    async fn copy_spec(cas: &Store) -> BuildSpec {
        let a = cas.put(b"input-a".to_vec(), ObjectKind::Build).await.unwrap();
        BuildSpec {
            name: "copy-a-to-out".into(),
            version: "1".into(),
            inputs: vec![BuildInput {
                role: "a".into(),
                digest: a,
                kind: ObjectKind::Build,
            }],
            outputs: vec![BuildOutput {
                name: "out".into(),
                kind: ObjectKind::Build,
            }],
            command: vec!["cp".into(), "a".into(), "out".into()],
            env: Default::default(),
            target_system: "x86_64-linux".into(),
            reproducible: true,
        }
    }

    #[tokio::test]
    async fn builds_and_caches() {
        let (_dir, builder) = fixture().await;
        let spec = copy_spec(&builder.cas).await;

        let first = builder.build(&spec).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, "out");

        let second = builder.build(&spec).await.unwrap();
        assert_eq!(first[0].1, second[0].1);
    }

    #[tokio::test]
    async fn missing_input_fails_dependency_not_found() {
        let (_dir, builder) = fixture().await;
        let mut spec = copy_spec(&builder.cas).await;
        spec.inputs[0].digest = Digest::of(b"never stored");

        let err = builder.build(&spec).await.unwrap_err();
        assert!(matches!(err, Error::DependencyNotFound { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_build() {
        let (_dir, builder) = fixture().await;
        let mut spec = copy_spec(&builder.cas).await;
        spec.command = vec!["false".into()];

        let err = builder.build(&spec).await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed { .. }));
    }
}
