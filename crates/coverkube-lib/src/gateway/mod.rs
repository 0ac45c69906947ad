//! Capability interface over the Kubernetes API
//!
//! Every workflow talks to the cluster only through [`ResourceGateway`]. The
//! production implementation is [`KubeGateway`]; tests substitute in-memory
//! fakes or `mockall` mocks.
//!
//! Errors follow the crate taxonomy: a missing object is
//! [`Error::NotFound`](crate::Error::NotFound), a duplicate create is
//! [`Error::AlreadyExists`](crate::Error::AlreadyExists), a stale update is
//! [`Error::Conflict`](crate::Error::Conflict). Nothing is retried here.

mod client;

pub use client::KubeGateway;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// Get a Deployment by name
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// Replace a Deployment, guarded by its resource version
    async fn update_deployment(&self, namespace: &str, deployment: &Deployment)
        -> Result<Deployment>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// List pods matching a rendered label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim>;

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    /// List cluster-scoped storage classes
    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>>;

    /// Query the API server version, used as a connectivity check
    async fn server_version(&self) -> Result<String>;
}
