//! Convergence polling
//!
//! [`wait_until`] is the single primitive behind every "wait for X" step.
//! [`Convergence`] builds the three detectors used by the workflows on top
//! of it: rollout, pod readiness and pod absence.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::ResourceGateway;
use crate::models::PodPhase;

/// Poll until `poll` reports done, fails, the timeout elapses or `cancel` fires.
///
/// `poll` is always called at least once. Its errors are returned
/// immediately without retry. Between calls the loop sleeps for `interval`,
/// shortened so that a final poll happens at the deadline.
pub async fn wait_until<F, Fut>(
    description: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let done = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = poll() => result?,
        };

        if done {
            debug!(
                attempts,
                elapsed_ms = start.elapsed().as_millis(),
                "{} converged",
                description
            );
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout {
                description: description.to_string(),
                timeout,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(interval.min(timeout - elapsed)) => {}
        }
    }
}

/// Names of the replica pods observed before a restart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSnapshot {
    names: BTreeSet<String>,
}

impl PodSnapshot {
    pub fn from_pods(pods: &[Pod]) -> Self {
        Self {
            names: pods.iter().map(|p| p.name_any()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True once none of the snapshotted pods is among `current`.
    ///
    /// This only says the old generation is gone, not that the new one is ready.
    pub fn is_superseded_by(&self, current: &[Pod]) -> bool {
        !current.iter().any(|p| self.names.contains(&p.name_any()))
    }
}

/// Detectors polling the cluster through a gateway
pub struct Convergence<'a> {
    gateway: &'a dyn ResourceGateway,
    interval: Duration,
    cancel: &'a CancellationToken,
}

impl<'a> Convergence<'a> {
    pub fn new(
        gateway: &'a dyn ResourceGateway,
        interval: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            gateway,
            interval,
            cancel,
        }
    }

    /// Wait until no pod from `snapshot` matches `selector` any more
    pub async fn rollout(
        &self,
        namespace: &str,
        selector: &str,
        snapshot: &PodSnapshot,
        timeout: Duration,
    ) -> Result<()> {
        let gateway = self.gateway;
        debug!(namespace, selector, old_pods = snapshot.len(), "waiting for rollout");

        wait_until("rollout", self.interval, timeout, self.cancel, move || async move {
            let current = gateway.list_pods(namespace, selector).await?;
            Ok(snapshot.is_superseded_by(&current))
        })
        .await
    }

    /// Wait until the pod reports phase Running; transient API errors are polled through
    pub async fn pod_running(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let gateway = self.gateway;
        let description = format!("pod {} to be running", name);

        wait_until(&description, self.interval, timeout, self.cancel, move || async move {
            match gateway.get_pod(namespace, name).await {
                Ok(pod) => Ok(PodPhase::of(&pod) == PodPhase::Running),
                Err(e) if e.is_transient() => {
                    warn!(pod = %name, error = %e, "transient error while polling pod");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Wait until fetching the pod returns NotFound
    pub async fn pod_absent(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let gateway = self.gateway;
        let description = format!("pod {} to be deleted", name);

        wait_until(&description, self.interval, timeout, self.cancel, move || async move {
            match gateway.get_pod(namespace, name).await {
                Ok(_) => Ok(false),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await
    }
}
