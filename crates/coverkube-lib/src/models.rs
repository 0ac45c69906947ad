//! Core data models shared by the gateway and the workflows

use std::fmt;

use k8s_openapi::api::core::v1::Pod;

/// Resource kinds the gateway operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Deployment
    Workload,
    /// Pod, including the collector
    Pod,
    /// PersistentVolumeClaim
    StorageClaim,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Workload => "deployment",
            ResourceKind::Pod => "pod",
            ResourceKind::StorageClaim => "persistentvolumeclaim",
        };
        f.write_str(s)
    }
}

/// Kind of object being instrumented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Deployment,
    Pod,
}

impl TargetKind {
    /// Short form used when deriving resource names
    pub fn short_name(&self) -> &'static str {
        match self {
            TargetKind::Deployment => "deploy",
            TargetKind::Pod => "pod",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Deployment => f.write_str("deployment"),
            TargetKind::Pod => f.write_str("pod"),
        }
    }
}

/// Reference to the workload a workflow runs against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub namespace: String,
    pub kind: TargetKind,
    pub name: String,
}

impl Target {
    pub fn deployment(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: TargetKind::Deployment,
            name: name.into(),
        }
    }

    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: TargetKind::Pod,
            name: name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} in namespace {}", self.kind, self.name, self.namespace)
    }
}

/// Observed pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Read the phase from a pod's status, defaulting to `Unknown`
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}
