//! Copying coverage files out of the collector pod

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Transfers a directory from a container to the local filesystem
#[async_trait]
pub trait ArtifactExtractor: Send + Sync {
    /// Copy the contents of `source` inside the container into `destination`
    async fn copy_out(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        source: &str,
        destination: &Path,
    ) -> Result<()>;
}

/// Runs `tar` in the container through the exec subresource and unpacks its output
#[derive(Clone)]
pub struct KubeExecExtractor {
    client: Client,
}

impl KubeExecExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactExtractor for KubeExecExtractor {
    async fn copy_out(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        source: &str,
        destination: &Path,
    ) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        debug!(pod, container, source, "starting tar in collector");
        let mut process = pods
            .exec(pod, vec!["tar", "cf", "-", "-C", source, "."], &params)
            .await?;

        let mut stdout = process
            .stdout()
            .ok_or_else(|| Error::extraction("exec session has no stdout"))?;
        let mut stderr = process
            .stderr()
            .ok_or_else(|| Error::extraction("exec session has no stderr"))?;
        let status = process
            .take_status()
            .ok_or_else(|| Error::extraction("exec session has no status channel"))?;

        let mut archive = Vec::new();
        let mut diagnostics = Vec::new();
        let (out, err) = tokio::join!(
            stdout.read_to_end(&mut archive),
            stderr.read_to_end(&mut diagnostics)
        );
        out?;
        err?;

        let status = status.await;
        process
            .join()
            .await
            .map_err(|e| Error::extraction(format!("exec session failed: {}", e)))?;

        // A session closed without a status frame counts as success
        let failed = status
            .as_ref()
            .is_some_and(|s| s.status.as_deref() != Some("Success"));
        if failed {
            let message = status.and_then(|s| s.message).unwrap_or_default();
            return Err(Error::extraction(format!(
                "tar exited unsuccessfully: {} {}",
                message,
                String::from_utf8_lossy(&diagnostics).trim()
            )));
        }

        let bytes = archive.len();
        let destination: PathBuf = destination.to_path_buf();
        let target = destination.clone();
        tokio::task::spawn_blocking(move || unpack_archive(&archive, &target))
            .await
            .map_err(|e| Error::extraction(format!("unpack task failed: {}", e)))??;

        info!(pod, bytes, destination = %destination.display(), "coverage data copied");
        Ok(())
    }
}

/// Unpack a tar stream into `destination`; entries escaping it are skipped by `tar`
pub fn unpack_archive(bytes: &[u8], destination: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(Cursor::new(bytes));
    archive.set_preserve_permissions(false);
    archive
        .unpack(destination)
        .map_err(|e| Error::extraction(format!("invalid archive: {}", e)))
}
