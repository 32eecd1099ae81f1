//! Rootfs preparation: unpacking CAS layers into an overlay mount
//! (`spec.md` §4.4 step 2).

use std::path::{Path, PathBuf};

use capsule_cas::Store as CasStore;
use capsule_core::Digest;

use crate::error::{Error, Result};

/// The directory tree backing one capsule's rootfs.
pub struct RootfsLayout {
    /// Root of this capsule's private directory tree.
    pub capsule_dir: PathBuf,
    /// `overlay` lower directories, one per image layer, lowest first.
    pub lower_dirs: Vec<PathBuf>,
    /// `overlay` upper (writable) directory.
    pub upper_dir: PathBuf,
    /// `overlay` workdir, required by the kernel alongside `upper_dir`.
    pub work_dir: PathBuf,
    /// The merged mountpoint the capsule actually chroots into.
    pub merged_dir: PathBuf,
}

/// Extract each layer digest into its own lower directory under
/// `capsule_dir/layers/<n>`, oldest (base) layer first, and lay out
/// the `upper`/`work`/`merged` directories `overlay` needs.
///
/// Each layer is stored in CAS already decompressed (`capsule-image`'s
/// contract) as a tar stream; this function is the unpack step that
/// contract was written for.
pub async fn prepare(cas: &CasStore, capsule_dir: &Path, layers: &[Digest]) -> Result<RootfsLayout> {
    tokio::fs::create_dir_all(capsule_dir).await?;
    let layers_dir = capsule_dir.join("layers");
    let upper_dir = capsule_dir.join("upper");
    let work_dir = capsule_dir.join("work");
    let merged_dir = capsule_dir.join("merged");
    for dir in [&layers_dir, &upper_dir, &work_dir, &merged_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut lower_dirs = Vec::with_capacity(layers.len());
    for (index, digest) in layers.iter().enumerate() {
        let layer_dir = layers_dir.join(index.to_string());
        tokio::fs::create_dir_all(&layer_dir).await?;
        let bytes = cas.get(*digest).await?;
        extract_tar(&layer_dir, bytes)
            .await
            .map_err(|e| Error::MountFailed(format!("unpacking layer {digest}: {e}")))?;
        lower_dirs.push(layer_dir);
    }

    Ok(RootfsLayout {
        capsule_dir: capsule_dir.to_path_buf(),
        lower_dirs,
        upper_dir,
        work_dir,
        merged_dir,
    })
}

async fn extract_tar(dest: &Path, tar_bytes: Vec<u8>) -> std::io::Result<()> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut archive = tar::Archive::new(std::io::Cursor::new(tar_bytes));
        archive.set_preserve_permissions(true);
        archive.unpack(&dest)
    })
    .await
    .expect("tar extraction task panicked")
}

impl RootfsLayout {
    /// The `overlay` mount `data=` option string: `lowerdir` is
    /// colon-separated, highest-priority (topmost, last-applied) layer
    /// first per the kernel's convention — the reverse of the order
    /// layers were unpacked in.
    pub fn overlay_data(&self) -> String {
        let lower = self
            .lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={lower},upperdir={},workdir={}",
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_cas::ObjectKind;

    fn tar_with_file(name: &str, content: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut bytes);
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, content).unwrap();
            builder.finish().unwrap();
        }
        bytes
    }

    #[tokio::test]
    async fn prepare_unpacks_layers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cas = CasStore::open(dir.path().join("cas")).unwrap();
        let base = cas
            .put(tar_with_file("etc/os-release", b"base"), ObjectKind::Layer)
            .await
            .unwrap();
        let top = cas
            .put(tar_with_file("app/main", b"app"), ObjectKind::Layer)
            .await
            .unwrap();

        let layout = prepare(&cas, &dir.path().join("capsule"), &[base, top])
            .await
            .unwrap();

        assert!(layout.lower_dirs[0].join("etc/os-release").exists());
        assert!(layout.lower_dirs[1].join("app/main").exists());
        let data = layout.overlay_data();
        assert!(data.contains("lowerdir="));
        // Highest-priority (top) layer listed first in `lowerdir=`.
        assert!(data.find("layers/1").unwrap() < data.find("layers/0").unwrap());
    }
}
