//! Integration tests for the workflows
//!
//! These tests verify:
//! - Error handling against mocked gateway responses
//! - Complete Init, Collect and Clear runs against an in-memory cluster

use super::*;
use crate::error::Result;
use crate::models::{PodPhase, ResourceKind};
use crate::names::LABEL_MANAGED_BY;
use crate::patch::is_patched;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaim, PodSpec, PodStatus, PodTemplateSpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const NAMESPACE: &str = "default";

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "web".to_string())])
}

fn app_container() -> Container {
    Container {
        name: "web".to_string(),
        image: Some("ghcr.io/acme/web:1.0".to_string()),
        env: Some(vec![EnvVar {
            name: "LOG_LEVEL".to_string(),
            value: Some("debug".to_string()),
            value_from: None,
        }]),
        ..Default::default()
    }
}

/// Helper to create the Deployment every scenario instruments
fn create_test_deployment() -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![app_container()],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn running_pod(name: &str, labels: Option<BTreeMap<String, String>>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels,
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![app_container()],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

fn default_class() -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some("standard".to_string()),
            annotations: Some(BTreeMap::from([(
                "storageclass.kubernetes.io/is-default-class".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        provisioner: "rancher.io/local-path".to_string(),
        ..Default::default()
    }
}

fn fast_settings() -> Settings {
    Settings {
        poll_interval_ms: 1,
        ..Settings::default()
    }
}

fn not_found(kind: ResourceKind, name: &str) -> Error {
    Error::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn already_exists(kind: ResourceKind, name: &str) -> Error {
    Error::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

#[derive(Default)]
struct ClusterState {
    deployments: BTreeMap<String, Deployment>,
    pods: BTreeMap<String, Pod>,
    claims: BTreeMap<String, PersistentVolumeClaim>,
    storage_classes: Vec<StorageClass>,
    /// Remaining reads before a created pod turns Running
    starting: BTreeMap<String, u32>,
    /// Remaining reads before a deleted pod disappears
    terminating: BTreeMap<String, u32>,
    /// Replicas still to be replaced, one per list call
    rollout: VecDeque<String>,
    stalled: bool,
    /// Every pod read also bumps the Deployment's resourceVersion
    status_writes: bool,
    /// Gateway and extractor calls in the order they happened
    events: Vec<String>,
    version: u64,
    claim_creates: usize,
    deployment_updates: usize,
}

impl ClusterState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn selector_pairs(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|req| req.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn labels_match(pod: &Pod, pairs: &[(String, String)]) -> bool {
    let labels = pod.labels();
    pairs.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// In-memory cluster with simulated rollouts and pod lifecycles
struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    /// A cluster with a default storage class and a two-replica `web` Deployment
    fn new() -> Arc<Self> {
        let mut state = ClusterState {
            storage_classes: vec![default_class()],
            version: 100,
            ..Default::default()
        };
        state
            .deployments
            .insert(key(NAMESPACE, "web"), create_test_deployment());
        for name in ["web-a", "web-b"] {
            state
                .pods
                .insert(key(NAMESPACE, name), running_pod(name, Some(app_labels())));
        }
        state
            .pods
            .insert(key(NAMESPACE, "batch"), running_pod("batch", None));

        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    fn deployment(&self) -> Deployment {
        self.state.lock().unwrap().deployments[&key(NAMESPACE, "web")].clone()
    }

    fn template(&self) -> PodTemplateSpec {
        self.deployment().spec.unwrap().template
    }

    fn template_spec(&self) -> PodSpec {
        self.template().spec.unwrap()
    }

    fn pod(&self, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(&key(NAMESPACE, name)).cloned()
    }

    fn replica_names(&self) -> BTreeSet<String> {
        let pairs = selector_pairs("app=web");
        self.state
            .lock()
            .unwrap()
            .pods
            .values()
            .filter(|p| labels_match(p, &pairs))
            .map(|p| p.name_any())
            .collect()
    }

    fn claims(&self) -> Vec<PersistentVolumeClaim> {
        self.state.lock().unwrap().claims.values().cloned().collect()
    }

    fn claim_creates(&self) -> usize {
        self.state.lock().unwrap().claim_creates
    }

    fn deployment_updates(&self) -> usize {
        self.state.lock().unwrap().deployment_updates
    }

    fn remove_storage_classes(&self) {
        self.state.lock().unwrap().storage_classes.clear();
    }

    /// Created pods stay Pending forever
    fn stall_pods(&self) {
        self.state.lock().unwrap().stalled = true;
    }

    /// Simulate the deployment controller writing status while pods are polled
    fn write_status_on_pod_reads(&self) {
        self.state.lock().unwrap().status_writes = true;
    }

    fn record(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }

    fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }
}

#[async_trait]
impl ResourceGateway for FakeCluster {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let state = self.state.lock().unwrap();
        state
            .deployments
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Workload, name))
    }

    async fn update_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let name = deployment.name_any();
        let k = key(namespace, &name);

        let existing = state
            .deployments
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Workload, &name))?;
        if existing.metadata.resource_version != deployment.metadata.resource_version {
            return Err(Error::Conflict {
                kind: ResourceKind::Workload,
                name,
                message: "the object has been modified".to_string(),
            });
        }

        let mut stored = deployment.clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.deployment_updates += 1;
        state.events.push(format!("update_deployment {}", name));

        let template_changed = existing.spec.as_ref().map(|s| &s.template)
            != stored.spec.as_ref().map(|s| &s.template);
        if template_changed {
            let pairs = selector_pairs("app=web");
            state.rollout = state
                .pods
                .values()
                .filter(|p| labels_match(p, &pairs))
                .map(|p| p.name_any())
                .collect();
        }

        state.deployments.insert(k, stored.clone());
        Ok(stored)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let k = key(namespace, name);

        if state.status_writes {
            let version = state.next_version();
            if let Some(deployment) = state.deployments.get_mut(&key(namespace, "web")) {
                deployment.metadata.resource_version = Some(version);
            }
        }

        if let Some(remaining) = state.terminating.get_mut(&k) {
            if *remaining == 0 {
                state.terminating.remove(&k);
                state.pods.remove(&k);
                return Err(not_found(ResourceKind::Pod, name));
            }
            *remaining -= 1;
        }

        if let Some(remaining) = state.starting.get_mut(&k) {
            if *remaining == 0 {
                state.starting.remove(&k);
                if let Some(pod) = state.pods.get_mut(&k) {
                    pod.status = Some(PodStatus {
                        phase: Some("Running".to_string()),
                        ..Default::default()
                    });
                }
            } else if !state.stalled {
                *remaining -= 1;
            }
        }

        let pod = state
            .pods
            .get(&k)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Pod, name))?;
        if PodPhase::of(&pod) == PodPhase::Running {
            state.events.push(format!("running {}", name));
        }
        Ok(pod)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let name = pod.name_any();
        let k = key(namespace, &name);

        if state.pods.contains_key(&k) {
            return Err(already_exists(ResourceKind::Pod, &name));
        }

        let mut stored = pod.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.next_version());
        stored.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        state.starting.insert(k.clone(), 1);
        state.pods.insert(k, stored.clone());
        state.events.push(format!("create_pod {}", name));
        Ok(stored)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, name);
        if !state.pods.contains_key(&k) {
            return Err(not_found(ResourceKind::Pod, name));
        }
        state.terminating.entry(k).or_insert(1);
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let pairs = selector_pairs(label_selector);

        if let Some(old) = state.rollout.pop_front() {
            state.pods.remove(&key(namespace, &old));
            let name = format!("web-{}", state.next_version());
            state.pods.insert(
                key(namespace, &name),
                running_pod(&name, Some(app_labels())),
            );
        }

        let prefix = format!("{}/", namespace);
        let pods: Vec<Pod> = state
            .pods
            .iter()
            .filter(|(k, p)| k.starts_with(&prefix) && labels_match(p, &pairs))
            .map(|(_, p)| p.clone())
            .collect();

        let mut event = "list_pods".to_string();
        for pod in &pods {
            event.push(' ');
            event.push_str(&pod.name_any());
        }
        state.events.push(event);
        Ok(pods)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let state = self.state.lock().unwrap();
        state
            .claims
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::StorageClaim, name))
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let mut state = self.state.lock().unwrap();
        state.claim_creates += 1;
        let name = claim.name_any();
        let k = key(namespace, &name);
        if state.claims.contains_key(&k) {
            return Err(already_exists(ResourceKind::StorageClaim, &name));
        }
        state.claims.insert(k, claim.clone());
        Ok(claim.clone())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .claims
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::StorageClaim, name))
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        Ok(self.state.lock().unwrap().storage_classes.clone())
    }

    async fn server_version(&self) -> Result<String> {
        Ok("v1.28.3".to_string())
    }
}

/// Extractor recording its calls and writing a marker file
#[derive(Default)]
struct RecordingExtractor {
    calls: Mutex<Vec<(String, String, String, PathBuf)>>,
    failing: bool,
    /// Cluster whose event log also receives the extraction
    cluster: Option<Arc<FakeCluster>>,
}

impl RecordingExtractor {
    fn logging_to(cluster: &Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster: Some(cluster.clone()),
            ..Default::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    fn calls(&self) -> Vec<(String, String, String, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactExtractor for RecordingExtractor {
    async fn copy_out(
        &self,
        _namespace: &str,
        pod: &str,
        container: &str,
        source: &str,
        destination: &Path,
    ) -> Result<()> {
        self.calls.lock().unwrap().push((
            pod.to_string(),
            container.to_string(),
            source.to_string(),
            destination.to_path_buf(),
        ));
        if let Some(cluster) = &self.cluster {
            cluster.record(format!("extract {}", pod));
        }
        if self.failing {
            return Err(Error::extraction("tar: /tmp/coverage: Cannot open"));
        }
        tokio::fs::write(destination.join("covmeta.5d2f"), b"meta").await?;
        Ok(())
    }
}

fn orchestrator_for(cluster: &Arc<FakeCluster>, extractor: &Arc<RecordingExtractor>) -> Orchestrator {
    Orchestrator::builder()
        .gateway(cluster.clone())
        .extractor(extractor.clone())
        .settings(fast_settings())
        .build()
        .unwrap()
}

mod mock_gateway_tests {
    use super::*;
    use crate::gateway::MockResourceGateway;

    /// Extractor failing a fixed number of times before succeeding
    struct FlakyExtractor {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactExtractor for FlakyExtractor {
        async fn copy_out(&self, _: &str, _: &str, _: &str, _: &str, _: &Path) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(Error::validation("stream closed"))
            } else {
                Ok(())
            }
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyExtractor> {
        Arc::new(FlakyExtractor {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn build(gateway: MockResourceGateway, extractor: Arc<FlakyExtractor>, attempts: u32) -> Orchestrator {
        Orchestrator::builder()
            .gateway(Arc::new(gateway))
            .extractor(extractor)
            .settings(Settings {
                extraction_attempts: attempts,
                ..fast_settings()
            })
            .build()
            .unwrap()
    }

    /// Gateway under which Collect reaches the extraction step
    fn collecting_gateway() -> MockResourceGateway {
        let mut gateway = MockResourceGateway::new();
        gateway
            .expect_get_pod()
            .returning(|_, name| Ok(running_pod(name, None)));
        gateway
            .expect_get_deployment()
            .returning(|_, _| Ok(create_test_deployment()));
        gateway
            .expect_get_claim()
            .returning(|_, _| Ok(Default::default()));
        gateway.expect_create_pod().returning(|_, pod| Ok(pod.clone()));
        gateway.expect_list_pods().returning(|_, _| Ok(vec![]));
        gateway
            .expect_update_deployment()
            .returning(|_, d| Ok(d.clone()));
        gateway
    }

    #[test]
    fn test_builder_requires_gateway_and_extractor() {
        assert!(Orchestrator::builder().build().is_err());
        assert!(Orchestrator::builder()
            .gateway(Arc::new(MockResourceGateway::new()))
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_init_on_missing_workload_is_not_found() {
        let mut gateway = MockResourceGateway::new();
        gateway
            .expect_get_deployment()
            .returning(|_, name| Err(not_found(ResourceKind::Workload, name)));
        gateway.expect_create_claim().never();

        let err = build(gateway, flaky(0), 1)
            .init(&Target::deployment(NAMESPACE, "ghost"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_conflict_on_update_aborts_init() {
        let mut gateway = MockResourceGateway::new();
        gateway
            .expect_get_deployment()
            .returning(|_, _| Ok(create_test_deployment()));
        gateway
            .expect_list_storage_classes()
            .returning(|| Ok(vec![default_class()]));
        gateway
            .expect_create_claim()
            .times(1)
            .returning(|_, claim| Ok(claim.clone()));
        gateway.expect_update_deployment().times(1).returning(|_, d| {
            Err(Error::Conflict {
                kind: ResourceKind::Workload,
                name: d.name_any(),
                message: "the object has been modified".to_string(),
            })
        });

        let err = build(gateway, flaky(0), 1)
            .init(&Target::deployment(NAMESPACE, "web"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_any_call() {
        let mut gateway = MockResourceGateway::new();
        gateway.expect_server_version().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = Orchestrator::builder()
            .gateway(Arc::new(gateway))
            .extractor(flaky(0))
            .cancellation_token(cancel)
            .build()
            .unwrap();

        let err = orchestrator.check_connection().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_check_connection_returns_version() {
        let mut gateway = MockResourceGateway::new();
        gateway
            .expect_server_version()
            .returning(|| Ok("v1.28.3".to_string()));

        let version = build(gateway, flaky(0), 1).check_connection().await.unwrap();
        assert_eq!(version, "v1.28.3");
    }

    #[tokio::test]
    async fn test_extraction_retries_up_to_configured_attempts() {
        let extractor = flaky(2);
        let report = build(collecting_gateway(), extractor.clone(), 3)
            .collect(&Target::deployment(NAMESPACE, "web"), Path::new("/tmp/out"))
            .await
            .unwrap();

        assert_eq!(report.destination, PathBuf::from("/tmp/out"));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_extraction_failure_surfaces_last_error() {
        let extractor = flaky(5);
        let err = build(collecting_gateway(), extractor.clone(), 2)
            .collect(&Target::deployment(NAMESPACE, "web"), Path::new("/tmp/out"))
            .await
            .unwrap_err();

        match err {
            Error::ExtractionFailed(message) => assert!(message.contains("stream closed")),
            other => panic!("expected ExtractionFailed, got {:?}", other),
        }
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }
}

mod workflow_tests {
    use super::*;
    use tempfile::TempDir;

    fn web() -> Target {
        Target::deployment(NAMESPACE, "web")
    }

    #[tokio::test]
    async fn test_init_provisions_claim_and_instruments_template() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());

        orchestrator_for(&cluster, &extractor).init(&web()).await.unwrap();

        let claims = cluster.claims();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].name_any(), "coverkube-deploy-web-pvc");
        assert_eq!(
            claims[0].labels().get(LABEL_MANAGED_BY).map(String::as_str),
            Some("coverkube")
        );
        assert!(is_patched(&cluster.template_spec()));
        assert!(extractor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_init_twice_does_not_duplicate_claim() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);

        orchestrator.init(&web()).await.unwrap();
        let after_first = cluster.template_spec();
        orchestrator.init(&web()).await.unwrap();

        assert_eq!(cluster.claims().len(), 1);
        assert_eq!(cluster.claim_creates(), 2);
        assert_eq!(cluster.template_spec(), after_first);
    }

    #[tokio::test]
    async fn test_init_without_default_class_leaves_template_untouched() {
        let cluster = FakeCluster::new();
        cluster.remove_storage_classes();
        let extractor = Arc::new(RecordingExtractor::default());

        let err = orchestrator_for(&cluster, &extractor)
            .init(&web())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoDefaultStorageClass));
        assert_eq!(cluster.deployment_updates(), 0);
        assert!(cluster.claims().is_empty());
    }

    #[tokio::test]
    async fn test_collect_without_init_creates_no_collector() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let out = TempDir::new().unwrap();

        let err = orchestrator_for(&cluster, &extractor)
            .collect(&web(), out.path())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StorageNotProvisioned { .. }));
        assert!(cluster.pod("coverkube-deploy-web-collector").is_none());
        assert!(extractor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_collect_restarts_replicas_and_extracts() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        let before = cluster.replica_names();

        let report = orchestrator.collect(&web(), out.path()).await.unwrap();

        assert_eq!(report.destination, out.path());
        assert!(cluster.replica_names().is_disjoint(&before));
        assert!(out.path().join("covmeta.5d2f").exists());

        let calls = extractor.calls();
        assert_eq!(calls.len(), 1);
        let (pod, container, source, destination) = &calls[0];
        assert_eq!(pod, "coverkube-deploy-web-collector");
        assert_eq!(container, "collector");
        assert_eq!(source, "/tmp/coverage");
        assert_eq!(destination, out.path());

        let collector = cluster.pod("coverkube-deploy-web-collector").unwrap();
        assert_eq!(PodPhase::of(&collector), PodPhase::Running);

        let annotations = cluster
            .deployment()
            .spec
            .unwrap()
            .template
            .metadata
            .unwrap()
            .annotations
            .unwrap();
        assert!(annotations.contains_key(crate::names::RESTARTED_AT_ANNOTATION));
    }

    #[tokio::test]
    async fn test_collect_restarts_latest_deployment_version() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        cluster.write_status_on_pod_reads();
        let before = cluster.replica_names();

        orchestrator.collect(&web(), out.path()).await.unwrap();

        assert!(cluster.replica_names().is_disjoint(&before));
        assert_eq!(extractor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_collect_starts_collector_before_restart_and_extracts_after_rollout() {
        let cluster = FakeCluster::new();
        let extractor = RecordingExtractor::logging_to(&cluster);
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        cluster.clear_events();
        orchestrator.collect(&web(), out.path()).await.unwrap();

        let events = cluster.events();
        let position = |event: &str| {
            events
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("no {:?} in {:?}", event, events))
        };
        let created = position("create_pod coverkube-deploy-web-collector");
        let running = position("running coverkube-deploy-web-collector");
        let updated = position("update_deployment web");
        let extracted = position("extract coverkube-deploy-web-collector");
        assert!(created < running, "{:?}", events);
        assert!(running < updated, "{:?}", events);
        assert!(updated < extracted, "{:?}", events);

        let listed = |index: usize| -> BTreeSet<String> {
            events[index]
                .trim_start_matches("list_pods")
                .split_whitespace()
                .map(String::from)
                .collect()
        };
        let snapshot = events[..updated]
            .iter()
            .rposition(|e| e.starts_with("list_pods"))
            .unwrap();
        let last = events[..extracted]
            .iter()
            .rposition(|e| e.starts_with("list_pods"))
            .unwrap();
        assert!(last > updated);
        assert!(!listed(snapshot).is_empty());
        assert!(listed(snapshot).is_disjoint(&listed(last)), "{:?}", events);
    }

    #[tokio::test]
    async fn test_collect_twice_reuses_collector() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        orchestrator.collect(&web(), out.path()).await.unwrap();
        orchestrator.collect(&web(), out.path()).await.unwrap();

        assert_eq!(extractor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_after_collect_restores_everything() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();
        let original = cluster.template();

        orchestrator.init(&web()).await.unwrap();
        orchestrator.collect(&web(), out.path()).await.unwrap();
        orchestrator.clear(&web()).await.unwrap();

        assert_eq!(cluster.template(), original);
        assert!(cluster.pod("coverkube-deploy-web-collector").is_none());
        assert!(cluster.claims().is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_safe_to_rerun() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);

        orchestrator.clear(&web()).await.unwrap();
        orchestrator.clear(&web()).await.unwrap();

        assert_eq!(cluster.deployment_updates(), 0);
        assert_eq!(cluster.template_spec(), create_test_deployment().spec.unwrap().template.spec.unwrap());
    }

    #[tokio::test]
    async fn test_pod_target_round_trip() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();
        let target = Target::pod(NAMESPACE, "batch");
        let original = cluster.pod("batch").unwrap().spec.unwrap();

        orchestrator.init(&target).await.unwrap();
        let instrumented = cluster.pod("batch").unwrap();
        assert!(is_patched(instrumented.spec.as_ref().unwrap()));
        assert_eq!(cluster.claims()[0].name_any(), "coverkube-pod-batch-pvc");

        orchestrator.collect(&target, out.path()).await.unwrap();
        assert_eq!(extractor.calls()[0].0, "coverkube-pod-batch-collector");

        orchestrator.clear(&target).await.unwrap();
        assert_eq!(cluster.pod("batch").unwrap().spec.unwrap(), original);
        assert!(cluster.pod("coverkube-pod-batch-collector").is_none());
        assert!(cluster.claims().is_empty());
        assert_eq!(cluster.deployment_updates(), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_leaves_collector_running() {
        let cluster = FakeCluster::new();
        let extractor = RecordingExtractor::failing();
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        let err = orchestrator.collect(&web(), out.path()).await.unwrap_err();

        match err {
            Error::ExtractionFailed(message) => assert!(message.contains("Cannot open")),
            other => panic!("expected ExtractionFailed, got {:?}", other),
        }
        assert!(cluster.pod("coverkube-deploy-web-collector").is_some());
    }

    #[tokio::test]
    async fn test_collector_that_never_starts_times_out() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = Orchestrator::builder()
            .gateway(cluster.clone())
            .extractor(extractor.clone())
            .settings(Settings {
                pod_ready_timeout_secs: 0,
                ..fast_settings()
            })
            .build()
            .unwrap();
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        cluster.stall_pods();
        let err = orchestrator.collect(&web(), out.path()).await.unwrap_err();

        match err {
            Error::Timeout { description, .. } => {
                assert!(description.contains("coverkube-deploy-web-collector"))
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(extractor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_waiting() {
        let cluster = FakeCluster::new();
        let extractor = Arc::new(RecordingExtractor::default());
        let orchestrator = orchestrator_for(&cluster, &extractor);
        let out = TempDir::new().unwrap();

        orchestrator.init(&web()).await.unwrap();
        cluster.stall_pods();

        let cancel = orchestrator.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = orchestrator.collect(&web(), out.path()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(extractor.calls().is_empty());
    }
}
