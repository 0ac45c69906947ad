//! Configuration management for the CLI

use anyhow::{Context, Result};
use coverkube_lib::Settings;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::debug;

/// Load workflow settings from `~/.config/coverkube/config.*` and `COVERKUBE_*`
pub fn load_settings() -> Result<Settings> {
    Settings::load().context("Failed to load coverkube settings")
}

/// Build a client from an explicit kubeconfig file, or infer one.
///
/// Inference merges every file listed in `KUBECONFIG`, then tries
/// `~/.kube/config`, then the in-cluster service account.
pub async fn kube_client(kubeconfig: Option<&str>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            debug!(path, "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("Invalid kubeconfig {}", path))?
        }
        None => kube::Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration from KUBECONFIG, ~/.kube/config or the cluster environment")?,
    };

    Client::try_from(config).context("Failed to create Kubernetes client")
}
