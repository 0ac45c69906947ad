//! Well-known names shared by Init, Collect and Clear
//!
//! The volume, mount path and environment variable are fixed. The storage
//! claim and the collector pod are named after the target so that several
//! workloads in one namespace can be instrumented side by side.

use sha2::{Digest, Sha256};

use crate::models::Target;

/// Environment variable the Go runtime reads to write coverage counters
pub const COVERAGE_ENV_VAR: &str = "GOCOVERDIR";

/// Name of the volume injected into the pod spec
pub const VOLUME_NAME: &str = "coverkube-tmp-coverage";

/// Mount path of the coverage volume, in the target and in the collector
pub const MOUNT_PATH: &str = "/tmp/coverage";

/// Container name inside the collector pod
pub const COLLECTOR_CONTAINER: &str = "collector";

/// Label marking resources created by this tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_MANAGED_BY_VALUE: &str = "coverkube";

/// Label carrying the (possibly shortened) target identifier
pub const LABEL_TARGET: &str = "coverkube.io/target";

/// Template annotation bumped to force a Deployment rollout
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// DNS label limit, also the label value limit
const MAX_NAME_LEN: usize = 63;
const HASH_SUFFIX_LEN: usize = 8;

/// Names of the per-target resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// PersistentVolumeClaim holding the coverage data
    pub claim: String,
    /// Helper pod used for extraction
    pub collector: String,
    /// Value of the target label
    pub target_label: String,
}

impl ResourceNames {
    /// Derive the names for a target. Same target, same names.
    pub fn for_target(target: &Target) -> Self {
        let base = format!("coverkube-{}-{}", target.kind.short_name(), target.name);
        Self {
            claim: bounded(&format!("{}-pvc", base)),
            collector: bounded(&format!("{}-collector", base)),
            target_label: bounded(&format!("{}-{}", target.kind.short_name(), target.name)),
        }
    }
}

/// Shorten a name to the DNS label limit, keeping it unique with a hash suffix
fn bounded(name: &str) -> String {
    if name.len() <= MAX_NAME_LEN {
        return name.to_string();
    }

    let digest = Sha256::digest(name.as_bytes());
    let suffix = &hex::encode(digest)[..HASH_SUFFIX_LEN];

    let keep = MAX_NAME_LEN - HASH_SUFFIX_LEN - 1;
    let prefix: String = name.chars().take(keep).collect();
    format!(
        "{}-{}",
        prefix.trim_end_matches(|c: char| c == '-' || c == '.'),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_deterministic() {
        let target = Target::deployment("default", "sample-server");
        let a = ResourceNames::for_target(&target);
        let b = ResourceNames::for_target(&target);
        assert_eq!(a, b);
        assert_eq!(a.claim, "coverkube-deploy-sample-server-pvc");
        assert_eq!(a.collector, "coverkube-deploy-sample-server-collector");
        assert_eq!(a.target_label, "deploy-sample-server");
    }

    #[test]
    fn test_targets_do_not_collide() {
        let deploy = ResourceNames::for_target(&Target::deployment("default", "web"));
        let pod = ResourceNames::for_target(&Target::pod("default", "web"));
        let other = ResourceNames::for_target(&Target::deployment("default", "api"));

        assert_ne!(deploy.claim, pod.claim);
        assert_ne!(deploy.claim, other.claim);
        assert_ne!(deploy.collector, other.collector);
    }

    #[test]
    fn test_long_names_fit_dns_label() {
        let long = "a".repeat(80);
        let names = ResourceNames::for_target(&Target::deployment("default", &long));
        assert!(names.claim.len() <= MAX_NAME_LEN);
        assert!(names.collector.len() <= MAX_NAME_LEN);
        assert!(names.target_label.len() <= MAX_NAME_LEN);
        assert_ne!(names.claim, names.collector);
    }

    #[test]
    fn test_long_names_differing_only_in_tail_stay_distinct() {
        let a = ResourceNames::for_target(&Target::deployment("default", &format!("{}x", "b".repeat(70))));
        let b = ResourceNames::for_target(&Target::deployment("default", &format!("{}y", "b".repeat(70))));
        assert_ne!(a.claim, b.claim);
    }
}
