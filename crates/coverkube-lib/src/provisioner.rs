//! Idempotent provisioning of the coverage claim and workload templates

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodSpec,
    ResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::gateway::ResourceGateway;
use crate::names::{
    ResourceNames, COLLECTOR_CONTAINER, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_TARGET,
    RESTARTED_AT_ANNOTATION,
};
use crate::patch::{coverage_mount, coverage_volume, patch_pod_spec, unpatch_pod_spec};

const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
const BETA_DEFAULT_CLASS_ANNOTATION: &str = "storageclass.beta.kubernetes.io/is-default-class";

/// Create the coverage claim; an existing claim counts as success.
pub async fn provision_storage(
    gateway: &dyn ResourceGateway,
    namespace: &str,
    names: &ResourceNames,
    settings: &Settings,
) -> Result<()> {
    let classes = gateway.list_storage_classes().await?;
    let storage_class = default_storage_class(&classes).ok_or(Error::NoDefaultStorageClass)?;
    debug!(storage_class = %storage_class, "using default storage class");

    let claim = storage_claim(names, &storage_class, &settings.storage_size);

    match gateway.create_claim(namespace, &claim).await {
        Ok(_) => {
            info!(namespace, claim = %names.claim, "persistent volume claim created");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(namespace, claim = %names.claim, "persistent volume claim already exists");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Name of the first storage class annotated as the cluster default
pub fn default_storage_class(classes: &[StorageClass]) -> Option<String> {
    classes
        .iter()
        .find(|sc| {
            let annotations = sc.annotations();
            [DEFAULT_CLASS_ANNOTATION, BETA_DEFAULT_CLASS_ANNOTATION]
                .iter()
                .any(|key| annotations.get(*key).map(String::as_str) == Some("true"))
        })
        .map(|sc| sc.name_any())
}

/// Single-writer claim of the configured size in the given storage class
pub fn storage_claim(names: &ResourceNames, storage_class: &str, size: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(names.claim.clone()),
            labels: Some(managed_labels(names)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(storage_class.to_string()),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Copy of the Deployment with the coverage patch applied to its template
pub fn patch_workload_template(deployment: &Deployment, names: &ResourceNames) -> Result<Deployment> {
    map_template_spec(deployment, |spec| patch_pod_spec(spec, &names.claim))
}

/// Copy of the Deployment with the coverage patch and the restart annotation
/// removed from its template.
///
/// Annotations and template metadata left empty become `None`, which is how
/// the API server returns a template that never carried them.
pub fn unpatch_workload_template(deployment: &Deployment) -> Result<Deployment> {
    let mut updated = map_template_spec(deployment, unpatch_pod_spec)?;
    if let Some(spec) = updated.spec.as_mut() {
        strip_restart_annotation(&mut spec.template.metadata);
    }
    Ok(updated)
}

fn strip_restart_annotation(metadata: &mut Option<ObjectMeta>) {
    let Some(meta) = metadata.as_mut() else {
        return;
    };
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(RESTARTED_AT_ANNOTATION);
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
    if *meta == ObjectMeta::default() {
        *metadata = None;
    }
}

/// Pod spec of a Deployment's template; a spec without containers is rejected
pub fn template_spec(deployment: &Deployment) -> Result<&PodSpec> {
    let name = deployment.name_any();
    let spec = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .ok_or_else(|| Error::invalid_workload(&name, "deployment has no pod template spec"))?;

    if spec.containers.is_empty() {
        return Err(Error::invalid_workload(&name, "pod template has no containers"));
    }

    Ok(spec)
}

fn map_template_spec(
    deployment: &Deployment,
    f: impl FnOnce(&PodSpec) -> PodSpec,
) -> Result<Deployment> {
    let updated_spec = f(template_spec(deployment)?);

    let mut updated = deployment.clone();
    if let Some(spec) = updated.spec.as_mut() {
        spec.template.spec = Some(updated_spec);
    }
    Ok(updated)
}

/// Idle helper pod mounting the coverage claim
pub fn collector_pod(names: &ResourceNames, image: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(names.collector.clone()),
            labels: Some(managed_labels(names)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: COLLECTOR_CONTAINER.to_string(),
                image: Some(image.to_string()),
                command: Some(vec![
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    "--".to_string(),
                ]),
                args: Some(vec!["while true; do sleep 30; done;".to_string()]),
                volume_mounts: Some(vec![coverage_mount()]),
                ..Default::default()
            }],
            volumes: Some(vec![coverage_volume(&names.claim)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn managed_labels(names: &ResourceNames) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string()),
        (LABEL_TARGET.to_string(), names.target_label.clone()),
    ])
}
