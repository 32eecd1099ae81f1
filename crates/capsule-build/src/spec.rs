//! Build specs and their canonical fingerprint (`spec.md` §3, §4.2).

use std::collections::BTreeMap;

use capsule_cas::ObjectKind;
use capsule_core::Digest;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInput {
    pub role: String,
    pub digest: Digest,
    pub kind: ObjectKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildOutput {
    pub name: String,
    pub kind: ObjectKind,
}

/// `spec.md` §3's `Build Spec`. `env` is a `BTreeMap` so iteration order
/// is already lexicographic by key, matching the fingerprint rule
/// directly instead of re-sorting at hash time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildSpec {
    pub name: String,
    pub version: String,
    pub inputs: Vec<BuildInput>,
    pub outputs: Vec<BuildOutput>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub target_system: String,
    pub reproducible: bool,
}

/// Compute the canonical, order-independent fingerprint of a build
/// spec: name, version, command, system, input digests sorted by
/// printable form, and env entries sorted lexicographically by key
/// with their values (`spec.md` §3, §4.2).
///
/// Two specs that are equal under this function MUST, if
/// `reproducible`, produce equal output digests (`spec.md` §8) — that
/// invariant is enforced by [`crate::builder::Builder::build`]'s
/// validation pass, not by this function, which only has to be
/// deterministic given equal inputs.
pub fn fingerprint(spec: &BuildSpec) -> Digest {
    let mut canonical = String::new();
    canonical.push_str("name:");
    canonical.push_str(&spec.name);
    canonical.push('\n');
    canonical.push_str("version:");
    canonical.push_str(&spec.version);
    canonical.push('\n');
    canonical.push_str("system:");
    canonical.push_str(&spec.target_system);
    canonical.push('\n');
    canonical.push_str("command:");
    canonical.push_str(&spec.command.join("\u{1f}"));
    canonical.push('\n');

    let mut input_digests: Vec<String> = spec.inputs.iter().map(|i| i.digest.to_string()).collect();
    input_digests.sort();
    for digest in input_digests {
        canonical.push_str("input:");
        canonical.push_str(&digest);
        canonical.push('\n');
    }

    // `env` is already a BTreeMap, so this iterates in key order.
    for (key, value) in &spec.env {
        canonical.push_str("env:");
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(value);
        canonical.push('\n');
    }

    Digest::of(canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> BuildSpec {
        BuildSpec {
            name: "widget".into(),
            version: "1.0.0".into(),
            inputs: vec![
                BuildInput {
                    role: "a".into(),
                    digest: Digest::of(b"a"),
                    kind: ObjectKind::Build,
                },
                BuildInput {
                    role: "b".into(),
                    digest: Digest::of(b"b"),
                    kind: ObjectKind::Build,
                },
            ],
            outputs: vec![BuildOutput {
                name: "out".into(),
                kind: ObjectKind::Build,
            }],
            command: vec!["cp".into(), "a".into(), "b".into(), "out".into()],
            env: BTreeMap::new(),
            target_system: "x86_64-linux".into(),
            reproducible: true,
        }
    }

    #[test]
    fn fingerprint_is_order_independent_on_inputs() {
        let spec_a = sample_spec();
        let mut spec_b = sample_spec();
        spec_b.inputs.reverse();
        assert_eq!(fingerprint(&spec_a), fingerprint(&spec_b));
    }

    #[test]
    fn fingerprint_changes_with_env() {
        let base = sample_spec();
        let mut with_env = sample_spec();
        with_env.env.insert("FOO".into(), "bar".into());
        assert_ne!(fingerprint(&base), fingerprint(&with_env));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let spec = sample_spec();
        assert_eq!(fingerprint(&spec), fingerprint(&spec));
    }
}
