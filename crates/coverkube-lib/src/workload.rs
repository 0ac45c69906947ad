//! The object being instrumented: a Deployment or a standalone Pod
//!
//! The variant is resolved once when a workflow starts. Deployments are
//! patched through their pod template and restarted by bumping a template
//! annotation. Pod specs are immutable, so a Pod is patched and restarted by
//! deleting it and creating a fresh copy.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use kube::ResourceExt;

use crate::error::{Error, Result};
use crate::gateway::ResourceGateway;
use crate::models::{Target, TargetKind};
use crate::names::{ResourceNames, RESTARTED_AT_ANNOTATION};
use crate::patch::{patch_pod_spec, unpatch_pod_spec};
use crate::provisioner::{patch_workload_template, template_spec, unpatch_workload_template};
use crate::selector::selector_string;

/// A resolved restart target
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(Deployment),
    Pod(Pod),
}

impl Workload {
    /// Fetch the target; a missing object is `NotFound`
    pub async fn resolve(gateway: &dyn ResourceGateway, target: &Target) -> Result<Self> {
        match target.kind {
            TargetKind::Deployment => gateway
                .get_deployment(&target.namespace, &target.name)
                .await
                .map(Workload::Deployment),
            TargetKind::Pod => gateway
                .get_pod(&target.namespace, &target.name)
                .await
                .map(Workload::Pod),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Workload::Deployment(d) => d.name_any(),
            Workload::Pod(p) => p.name_any(),
        }
    }

    /// Pod spec that carries the instrumentation
    pub fn pod_spec(&self) -> Result<&PodSpec> {
        match self {
            Workload::Deployment(d) => template_spec(d),
            Workload::Pod(p) => pod_spec(p),
        }
    }

    /// Instrumented copy of the workload
    pub fn patched(&self, names: &ResourceNames) -> Result<Workload> {
        match self {
            Workload::Deployment(d) => patch_workload_template(d, names).map(Workload::Deployment),
            Workload::Pod(p) => {
                let spec = patch_pod_spec(pod_spec(p)?, &names.claim);
                Ok(Workload::Pod(with_spec(p, spec)))
            }
        }
    }

    /// Copy of the workload without instrumentation
    pub fn unpatched(&self) -> Result<Workload> {
        match self {
            Workload::Deployment(d) => unpatch_workload_template(d).map(Workload::Deployment),
            Workload::Pod(p) => {
                let spec = unpatch_pod_spec(pod_spec(p)?);
                Ok(Workload::Pod(with_spec(p, spec)))
            }
        }
    }

    /// Whether `other` differs from `self` in what the workload runs: the
    /// whole pod template of a Deployment, the spec of a Pod
    pub fn template_differs(&self, other: &Workload) -> Result<bool> {
        match (self, other) {
            (Workload::Deployment(a), Workload::Deployment(b)) => {
                Ok(a.spec.as_ref().map(|s| &s.template) != b.spec.as_ref().map(|s| &s.template))
            }
            _ => Ok(self.pod_spec()? != other.pod_spec()?),
        }
    }
}

/// Label selector of a Deployment's replicas, rendered for list queries
pub fn replica_selector(deployment: &Deployment) -> Result<String> {
    let spec = deployment
        .spec
        .as_ref()
        .ok_or_else(|| Error::invalid_workload(deployment.name_any(), "deployment has no spec"))?;
    selector_string(&spec.selector)
}

/// Copy of the Deployment with its template's restart annotation set to `now`
pub fn with_restart_annotation(deployment: &Deployment, now: DateTime<Utc>) -> Deployment {
    let mut updated = deployment.clone();
    if let Some(spec) = updated.spec.as_mut() {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                RESTARTED_AT_ANNOTATION.to_string(),
                now.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
    }
    updated
}

/// Manifest for recreating a deleted pod: server-assigned fields are cleared
pub fn fresh_pod(pod: &Pod) -> Pod {
    let mut pod = pod.clone();
    let meta = &mut pod.metadata;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.managed_fields = None;
    meta.generation = None;
    pod.status = None;
    pod
}

fn pod_spec(pod: &Pod) -> Result<&PodSpec> {
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| Error::invalid_workload(pod.name_any(), "pod has no spec"))?;
    if spec.containers.is_empty() {
        return Err(Error::invalid_workload(pod.name_any(), "pod has no containers"));
    }
    Ok(spec)
}

fn with_spec(pod: &Pod, spec: PodSpec) -> Pod {
    let mut pod = pod.clone();
    pod.spec = Some(spec);
    pod
}
