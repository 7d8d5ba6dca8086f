//! High-level image pull orchestrator.
//!
//! Resolves the layer list, downloads every layer concurrently, then extracts
//! them one by one in manifest order. The whole sequence runs under the
//! configured pull timeout; hitting it drops the in-flight downloads.

use std::path::{Path, PathBuf};
use std::time::Instant;

use skiff_core::error::{Result, SkiffError};

use super::extract::extract_layers;
use super::manifest::Descriptor;
use super::reference::ImageReference;
use super::registry::RegistryClient;

/// Outcome of a successful pull.
#[derive(Debug, Clone)]
pub struct PullReport {
    /// Layers applied, base first.
    pub layers: Vec<Descriptor>,
    /// Directory the layers were extracted into.
    pub root: PathBuf,
}

/// Registry pipeline: resolve, download, extract.
pub struct ImagePuller {
    client: RegistryClient,
}

impl ImagePuller {
    /// Create a new image puller.
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Pull `reference` into `root`, bounded by the configured pull timeout.
    pub async fn pull(&self, reference: &ImageReference, root: &Path) -> Result<PullReport> {
        let timeout = self.client.config().pull_timeout();
        match tokio::time::timeout(timeout, self.pull_unbounded(reference, root)).await {
            Ok(result) => result,
            Err(_) => Err(SkiffError::Timeout(format!(
                "pulling {} exceeded {}s",
                reference,
                timeout.as_secs()
            ))),
        }
    }

    async fn pull_unbounded(&self, reference: &ImageReference, root: &Path) -> Result<PullReport> {
        let started = Instant::now();
        let image = reference.name.as_str();

        tracing::info!(image = %reference, platform = %self.client.platform(), "Resolving image");
        let layers = self
            .client
            .resolve_layers(image, reference.manifest_reference())
            .await?;

        tracing::info!(image = %reference, layers = layers.len(), "Downloading layers");
        self.client.download_layers(image, root, &layers).await?;

        let extract_root = root.to_path_buf();
        let extract_list = layers.clone();
        tokio::task::spawn_blocking(move || extract_layers(&extract_root, &extract_list))
            .await
            .map_err(|e| SkiffError::Extraction {
                archive: root.to_path_buf(),
                message: format!("extraction task failed: {}", e),
            })??;

        tracing::info!(
            image = %reference,
            root = %root.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image pulled"
        );

        Ok(PullReport {
            layers,
            root: root.to_path_buf(),
        })
    }
}
