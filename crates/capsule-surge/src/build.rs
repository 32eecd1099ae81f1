//! `services.<name>.build` (`spec.md` §6): run the build through the
//! reproducible builder and use its output as the capsule's rootfs.
//!
//! A build-backed service's `BuildSpec` is expected to declare an
//! output named `rootfs` (a tar stream, exactly like an image layer
//! `capsule-image` would unpack) — falling back to its first declared
//! output when there's exactly one, so the common single-output case
//! doesn't need the name spelled out twice.

use capsule_build::{BuildOutput, BuildSpec, Builder};
use capsule_core::Digest;

use crate::error::{Error, Result};

const ROOTFS_OUTPUT_NAME: &str = "rootfs";

pub async fn build_rootfs_layer(builder: &Builder, spec: &BuildSpec) -> Result<Digest> {
    let outputs = builder.build(spec).await.map_err(|e| Error::ServiceStartFailed(spec.name.clone(), e.to_string()))?;

    if let Some((_, digest)) = outputs.iter().find(|(name, _)| name == ROOTFS_OUTPUT_NAME) {
        return Ok(*digest);
    }
    if outputs.len() == 1 {
        return Ok(outputs[0].1);
    }
    Err(Error::ServiceStartFailed(
        spec.name.clone(),
        format!(
            "build declares {} outputs but none named {ROOTFS_OUTPUT_NAME:?}; add one or declare exactly one output",
            outputs.len()
        ),
    ))
}

/// Whether `spec` declares the rootfs output this module expects,
/// checked at spec-validation time rather than only at build time.
pub fn declares_rootfs_output(outputs: &[BuildOutput]) -> bool {
    outputs.len() == 1 || outputs.iter().any(|o| o.name == ROOTFS_OUTPUT_NAME)
}
