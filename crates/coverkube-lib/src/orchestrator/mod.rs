//! Init, Collect and Clear workflows
//!
//! Each workflow is a linear sequence of steps that are individually safe to
//! re-run. Nothing is persisted between runs and nothing is rolled back: the
//! first error aborts the workflow and is returned as is. `AlreadyExists`
//! and `NotFound` are tolerated only at the calls where they mean "done".

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::extractor::ArtifactExtractor;
use crate::gateway::ResourceGateway;
use crate::models::Target;
use crate::names::{ResourceNames, COLLECTOR_CONTAINER, MOUNT_PATH};
use crate::observability::{NoopProgress, ProgressReporter, Step, WorkflowLogger};
use crate::provisioner::{collector_pod, provision_storage};
use crate::waiter::{Convergence, PodSnapshot};
use crate::workload::{fresh_pod, replica_selector, with_restart_annotation, Workload};

/// Outcome of a successful Collect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    /// Directory the coverage files were written to
    pub destination: PathBuf,
    /// Wall time of the whole workflow
    pub elapsed: Duration,
}

/// Runs the coverage workflows against one cluster
pub struct Orchestrator {
    gateway: Arc<dyn ResourceGateway>,
    extractor: Arc<dyn ArtifactExtractor>,
    progress: Arc<dyn ProgressReporter>,
    settings: Settings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Token that aborts every running workflow when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Query the API server version; fails when the cluster is unreachable
    pub async fn check_connection(&self) -> Result<String> {
        let version = cancellable(&self.cancel, self.gateway.server_version()).await?;
        debug!(version = %version, "connected to cluster");
        Ok(version)
    }

    /// Provision the claim and instrument the target
    pub async fn init(&self, target: &Target) -> Result<()> {
        let run = Run::new(self, target, "init");
        let result = run.init().await;
        run.finish(result)
    }

    /// Restart the target and copy its coverage data into `destination`
    pub async fn collect(&self, target: &Target, destination: &Path) -> Result<CollectReport> {
        let run = Run::new(self, target, "collect");
        let result = run
            .collect(destination)
            .await
            .map(|()| CollectReport {
                destination: destination.to_path_buf(),
                elapsed: run.started.elapsed(),
            });
        run.finish(result)
    }

    /// Remove the instrumentation, the collector and the claim
    pub async fn clear(&self, target: &Target) -> Result<()> {
        let run = Run::new(self, target, "clear");
        let result = run.clear().await;
        run.finish(result)
    }
}

/// One workflow execution against one target
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    target: &'a Target,
    names: ResourceNames,
    logger: WorkflowLogger,
    workflow: &'static str,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(orchestrator: &'a Orchestrator, target: &'a Target, workflow: &'static str) -> Self {
        let logger = WorkflowLogger::new(target);
        logger.log_started(workflow);
        Self {
            orchestrator,
            target,
            names: ResourceNames::for_target(target),
            logger,
            workflow,
            started: Instant::now(),
        }
    }

    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.logger.log_finished(self.workflow, self.started.elapsed()),
            Err(e) => self.logger.log_failed(self.workflow, e),
        }
        result
    }

    fn gateway(&self) -> &'a dyn ResourceGateway {
        self.orchestrator.gateway.as_ref()
    }

    fn settings(&self) -> &'a Settings {
        &self.orchestrator.settings
    }

    fn namespace(&self) -> &'a str {
        &self.target.namespace
    }

    fn convergence(&self) -> Convergence<'a> {
        Convergence::new(
            self.gateway(),
            self.settings().poll_interval(),
            &self.orchestrator.cancel,
        )
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        cancellable(&self.orchestrator.cancel, fut).await
    }

    async fn step<T>(&self, step: Step, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let progress = &self.orchestrator.progress;
        progress.step_started(step);
        let start = Instant::now();

        match fut.await {
            Ok(value) => {
                let elapsed = start.elapsed();
                progress.step_finished(step, elapsed);
                self.logger.log_step(step, elapsed);
                Ok(value)
            }
            Err(e) => {
                progress.step_failed(step, &e);
                Err(e)
            }
        }
    }

    async fn resolve(&self) -> Result<Workload> {
        let workload = self.call(Workload::resolve(self.gateway(), self.target)).await?;
        workload.pod_spec()?;
        Ok(workload)
    }

    async fn init(&self) -> Result<()> {
        let workload = self.resolve().await?;

        self.step(
            Step::ProvisionStorage,
            self.call(provision_storage(
                self.gateway(),
                self.namespace(),
                &self.names,
                self.settings(),
            )),
        )
        .await?;

        self.step(Step::PatchWorkload, self.apply_patch(&workload)).await
    }

    async fn apply_patch(&self, workload: &Workload) -> Result<()> {
        let patched = workload.patched(&self.names)?;
        match &patched {
            // Always sent; an unchanged template is a no-op on the server
            Workload::Deployment(deployment) => {
                self.call(self.gateway().update_deployment(self.namespace(), deployment))
                    .await?;
            }
            Workload::Pod(pod) => {
                if workload.template_differs(&patched)? {
                    self.recreate_pod(pod).await?;
                } else {
                    debug!(pod = %pod.name_any(), "pod already instrumented");
                }
            }
        }
        Ok(())
    }

    async fn collect(&self, destination: &Path) -> Result<()> {
        let workload = self.resolve().await?;

        match self.call(self.gateway().get_claim(self.namespace(), &self.names.claim)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(Error::StorageNotProvisioned {
                    namespace: self.namespace().to_string(),
                    claim: self.names.claim.clone(),
                });
            }
            Err(e) => return Err(e),
        }

        self.step(Step::CreateCollector, self.start_collector()).await?;
        self.step(Step::RestartWorkload, self.restart(&workload)).await?;
        self.step(Step::ExtractCoverage, self.extract(destination)).await
    }

    async fn start_collector(&self) -> Result<()> {
        let pod = collector_pod(&self.names, &self.settings().collector_image);

        match self.call(self.gateway().create_pod(self.namespace(), &pod)).await {
            Ok(_) => info!(pod = %self.names.collector, "collector pod created"),
            Err(e) if e.is_already_exists() => {
                debug!(pod = %self.names.collector, "collector pod already exists")
            }
            Err(e) => return Err(e),
        }

        self.convergence()
            .pod_running(
                self.namespace(),
                &self.names.collector,
                self.settings().pod_ready_timeout(),
            )
            .await
    }

    async fn restart(&self, workload: &Workload) -> Result<()> {
        match workload {
            // Re-read after the collector wait; the controller may have written since
            Workload::Deployment(deployment) => {
                let current = self
                    .call(self.gateway().get_deployment(self.namespace(), &deployment.name_any()))
                    .await?;
                let restarted = with_restart_annotation(&current, Utc::now());
                self.update_and_roll_out(&restarted).await
            }
            Workload::Pod(pod) => self.recreate_pod(pod).await,
        }
    }

    /// Snapshot the current replicas, send `updated`, wait until the snapshot is gone
    async fn update_and_roll_out(&self, updated: &Deployment) -> Result<()> {
        let selector = replica_selector(updated)?;
        let pods = self.call(self.gateway().list_pods(self.namespace(), &selector)).await?;
        let snapshot = PodSnapshot::from_pods(&pods);

        self.call(self.gateway().update_deployment(self.namespace(), updated))
            .await?;

        self.convergence()
            .rollout(
                self.namespace(),
                &selector,
                &snapshot,
                self.settings().rollout_timeout(),
            )
            .await
    }

    /// Delete the pod, wait until it is gone, then create `pod` under the same name
    async fn recreate_pod(&self, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        let convergence = self.convergence();

        self.call(self.gateway().delete_pod(self.namespace(), &name)).await?;
        convergence
            .pod_absent(self.namespace(), &name, self.settings().pod_deletion_timeout())
            .await?;

        self.call(self.gateway().create_pod(self.namespace(), &fresh_pod(pod)))
            .await?;
        convergence
            .pod_running(self.namespace(), &name, self.settings().pod_ready_timeout())
            .await
    }

    async fn extract(&self, destination: &Path) -> Result<()> {
        let extractor = &self.orchestrator.extractor;
        let attempts = self.settings().extraction_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self
                .call(extractor.copy_out(
                    self.namespace(),
                    &self.names.collector,
                    COLLECTOR_CONTAINER,
                    MOUNT_PATH,
                    destination,
                ))
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "coverage extraction failed, retrying");
                    attempt += 1;
                    pause(&self.orchestrator.cancel, self.settings().poll_interval()).await?;
                }
                Err(Error::ExtractionFailed(message)) => {
                    return Err(Error::ExtractionFailed(message))
                }
                Err(e) => return Err(Error::extraction(e.to_string())),
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        let workload = self.resolve().await?;

        let unpatched = workload.unpatched()?;
        if workload.template_differs(&unpatched)? {
            self.step(Step::UnpatchWorkload, self.revert(&unpatched)).await?;
        } else {
            debug!(workload = %workload.name(), "workload is not instrumented");
        }

        self.step(Step::DeleteCollector, self.remove_collector()).await?;
        self.step(Step::DeleteStorage, self.remove_claim()).await
    }

    async fn revert(&self, unpatched: &Workload) -> Result<()> {
        match unpatched {
            Workload::Deployment(deployment) => self.update_and_roll_out(deployment).await,
            Workload::Pod(pod) => self.recreate_pod(pod).await,
        }
    }

    async fn remove_collector(&self) -> Result<()> {
        match self
            .call(self.gateway().delete_pod(self.namespace(), &self.names.collector))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(pod = %self.names.collector, "collector pod already gone")
            }
            Err(e) => return Err(e),
        }

        self.convergence()
            .pod_absent(
                self.namespace(),
                &self.names.collector,
                self.settings().pod_deletion_timeout(),
            )
            .await
    }

    async fn remove_claim(&self) -> Result<()> {
        match self
            .call(self.gateway().delete_claim(self.namespace(), &self.names.claim))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(claim = %self.names.claim, "persistent volume claim already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    gateway: Option<Arc<dyn ResourceGateway>>,
    extractor: Option<Arc<dyn ArtifactExtractor>>,
    progress: Arc<dyn ProgressReporter>,
    settings: Settings,
    cancel: CancellationToken,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            extractor: None,
            progress: Arc::new(NoopProgress),
            settings: Settings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn ResourceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn ArtifactExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let gateway = self
            .gateway
            .ok_or_else(|| Error::validation("gateway is required"))?;
        let extractor = self
            .extractor
            .ok_or_else(|| Error::validation("extractor is required"))?;

        Ok(Orchestrator {
            gateway,
            extractor,
            progress: self.progress,
            settings: self.settings,
            cancel: self.cancel,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
