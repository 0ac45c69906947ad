//! Coverage instrumentation patch for pod specs
//!
//! The patch touches the first container and the volume list only:
//! - env var `GOCOVERDIR=/tmp/coverage`
//! - volume mount of `coverkube-tmp-coverage` at `/tmp/coverage`
//! - volume `coverkube-tmp-coverage` backed by the target's claim
//!
//! Applying it twice equals applying it once, and [`unpatch_pod_spec`]
//! removes exactly what [`patch_pod_spec`] added. Lists left empty by the
//! inverse are stored as `None`, the form the API server returns.

use k8s_openapi::api::core::v1::{
    EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, Volume, VolumeMount,
};

use crate::names::{COVERAGE_ENV_VAR, MOUNT_PATH, VOLUME_NAME};

/// Return a patched copy of `spec`; entries already present are left alone.
///
/// Specs without containers get only the volume; callers reject them earlier.
pub fn patch_pod_spec(spec: &PodSpec, claim_name: &str) -> PodSpec {
    let mut spec = spec.clone();

    if let Some(container) = spec.containers.first_mut() {
        let env = container.env.get_or_insert_with(Vec::new);
        if !env.iter().any(|e| e.name == COVERAGE_ENV_VAR) {
            env.push(EnvVar {
                name: COVERAGE_ENV_VAR.to_string(),
                value: Some(MOUNT_PATH.to_string()),
                value_from: None,
            });
        }

        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        if !mounts.iter().any(|m| m.name == VOLUME_NAME) {
            mounts.push(coverage_mount());
        }
    }

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == VOLUME_NAME) {
        volumes.push(coverage_volume(claim_name));
    }

    spec
}

/// Return a copy of `spec` with the coverage entries removed.
///
/// An env, volumeMounts or volumes list that ends up empty becomes `None`,
/// including one that was `Some(vec![])` before patching.
pub fn unpatch_pod_spec(spec: &PodSpec) -> PodSpec {
    let mut spec = spec.clone();

    if let Some(container) = spec.containers.first_mut() {
        container.env = retain_or_none(container.env.take(), |e| e.name != COVERAGE_ENV_VAR);
        container.volume_mounts =
            retain_or_none(container.volume_mounts.take(), |m| m.name != VOLUME_NAME);
    }
    spec.volumes = retain_or_none(spec.volumes.take(), |v| v.name != VOLUME_NAME);

    spec
}

/// Whether any part of the patch is present
pub fn is_patched(spec: &PodSpec) -> bool {
    let container_patched = spec.containers.first().is_some_and(|c| {
        c.env.iter().flatten().any(|e| e.name == COVERAGE_ENV_VAR)
            || c.volume_mounts.iter().flatten().any(|m| m.name == VOLUME_NAME)
    });
    let volume_patched = spec.volumes.iter().flatten().any(|v| v.name == VOLUME_NAME);

    container_patched || volume_patched
}

/// Mount of the coverage volume, shared with the collector pod
pub fn coverage_mount() -> VolumeMount {
    VolumeMount {
        name: VOLUME_NAME.to_string(),
        mount_path: MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

/// Claim-backed coverage volume, shared with the collector pod
pub fn coverage_volume(claim_name: &str) -> Volume {
    Volume {
        name: VOLUME_NAME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

fn retain_or_none<T>(items: Option<Vec<T>>, keep: impl FnMut(&T) -> bool) -> Option<Vec<T>> {
    let mut items = items?;
    items.retain(keep);
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
