//! kube-rs backed gateway

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::ResourceGateway;
use crate::error::{Error, Result};
use crate::models::ResourceKind;

/// Gateway implementation over a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client, shared with the exec-based extractor
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceGateway for KubeGateway {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, ResourceKind::Workload, name))
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let name = deployment.name_any();
        debug!(
            namespace,
            deployment = %name,
            resource_version = ?deployment.resource_version(),
            "replacing deployment"
        );

        self.deployments(namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await
            .map_err(|e| Error::from_kube(e, ResourceKind::Workload, &name))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, ResourceKind::Pod, name))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let name = pod.name_any();
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::from_kube(e, ResourceKind::Pod, &name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, ResourceKind::Pod, name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(label_selector);
        self.pods(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(Error::from)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.claims(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, ResourceKind::StorageClaim, name))
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = claim.name_any();
        self.claims(namespace)
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| Error::from_kube(e, ResourceKind::StorageClaim, &name))
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.claims(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, ResourceKind::StorageClaim, name))
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(Error::from)
    }

    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }
}
