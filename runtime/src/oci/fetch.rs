//! Concurrent layer blob download.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use skiff_core::error::{Result, SkiffError};
use tokio::io::AsyncWriteExt;
use tokio::task::{Id, JoinSet};

use super::manifest::{is_valid_descriptor_digest, Descriptor};
use super::registry::{Endpoint, RegistryClient};

/// Accept value for layer blobs.
const LAYER_ACCEPT: &str = "application/vnd.oci.image.layer.v1.tar, \
     application/vnd.oci.image.layer.v1.tar+gzip, \
     application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Local file a layer blob is written to: `<root_dir>/<digest>.tar`.
pub fn layer_archive_path(root_dir: &Path, digest: &str) -> PathBuf {
    root_dir.join(format!("{}.tar", digest))
}

impl RegistryClient {
    /// Download one layer blob into `<root_dir>/<digest>.tar`.
    ///
    /// The body is streamed to disk chunk by chunk. A partially written file
    /// is left in place on failure.
    pub async fn download_layer(
        &self,
        image: &str,
        root_dir: &Path,
        digest: &str,
    ) -> Result<PathBuf> {
        let blob_err = |message: String| SkiffError::BlobDownload {
            digest: digest.to_string(),
            message,
        };

        if !is_valid_descriptor_digest(digest) {
            return Err(blob_err("malformed digest".to_string()));
        }

        let url = self.url(image, Endpoint::Blobs, digest);
        let request = self
            .authorized_get(image, &url, LAYER_ACCEPT, blob_err)
            .await?;

        let mut response = self
            .execute(request)
            .await
            .map_err(|e| blob_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(blob_err(format!("registry returned HTTP {}", status.as_u16())));
        }

        let path = layer_archive_path(root_dir, digest);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| blob_err(format!("failed to create {}: {}", path.display(), e)))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| blob_err(format!("transfer interrupted: {}", e)))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| blob_err(format!("failed to write {}: {}", path.display(), e)))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| blob_err(format!("failed to flush {}: {}", path.display(), e)))?;

        tracing::debug!(digest = %digest, bytes = written, "Downloaded layer");
        Ok(path)
    }

    /// Download all layers concurrently, one task per distinct digest.
    ///
    /// Returns the archive paths in the order of `layers`; a digest listed
    /// more than once maps to the same archive. The first failure is returned
    /// as soon as it arrives and the remaining downloads are aborted.
    pub async fn download_layers(
        &self,
        image: &str,
        root_dir: &Path,
        layers: &[Descriptor],
    ) -> Result<Vec<PathBuf>> {
        let mut tasks = JoinSet::new();
        let mut digests_by_task = HashMap::new();
        let mut seen = HashSet::new();
        for layer in layers {
            if !seen.insert(layer.digest.as_str()) {
                continue;
            }
            let client = self.clone();
            let image = image.to_string();
            let root_dir = root_dir.to_path_buf();
            let digest = layer.digest.clone();
            let handle =
                tasks.spawn(async move { client.download_layer(&image, &root_dir, &digest).await });
            digests_by_task.insert(handle.id(), layer.digest.clone());
        }

        join_downloads(image, tasks, digests_by_task).await?;

        Ok(layers
            .iter()
            .map(|layer| layer_archive_path(root_dir, &layer.digest))
            .collect())
    }
}

/// Join every download, returning the first failure. A task that panicked or
/// was cancelled is reported under the digest it was spawned for.
async fn join_downloads(
    image: &str,
    mut tasks: JoinSet<Result<PathBuf>>,
    mut digests_by_task: HashMap<Id, String>,
) -> Result<()> {
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, Ok(_))) => {}
            Ok((_, Err(e))) => {
                tracing::warn!(image = %image, error = %e, "Layer download failed, aborting pull");
                return Err(e);
            }
            Err(e) => {
                let digest = digests_by_task
                    .remove(&e.id())
                    .unwrap_or_else(|| "(unknown)".to_string());
                return Err(SkiffError::BlobDownload {
                    digest,
                    message: format!("download task failed: {}", e),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skiff_core::config::RegistryConfig;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> RegistryClient {
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "blob-token",
                "expires_in": 300,
            })))
            .mount(server)
            .await;

        let config = RegistryConfig {
            registry_url: server.uri(),
            auth_url: server.uri(),
            ..Default::default()
        };
        RegistryClient::new(config).unwrap()
    }

    fn layer(digest: &str) -> Descriptor {
        Descriptor {
            media_type: "application/vnd.oci.image.layer.v1.tar".to_string(),
            digest: digest.to_string(),
            size: 0,
        }
    }

    #[test]
    fn test_layer_archive_path() {
        assert_eq!(
            layer_archive_path(Path::new("/tmp/root"), "sha256:abc"),
            PathBuf::from("/tmp/root/sha256:abc.tar")
        );
    }

    #[tokio::test]
    async fn test_download_layer_writes_body() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let root = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:aa"))
            .and(header("authorization", "Bearer blob-token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
            .expect(1)
            .mount(&server)
            .await;

        let path = client
            .download_layer("alpine", root.path(), "sha256:aa")
            .await
            .unwrap();
        assert_eq!(path, root.path().join("sha256:aa.tar"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 64 * 1024]);
    }

    #[tokio::test]
    async fn test_download_layer_error_status() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let root = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client
            .download_layer("alpine", root.path(), "sha256:missing")
            .await
            .unwrap_err();
        match err {
            SkiffError::BlobDownload { digest, message } => {
                assert_eq!(digest, "sha256:missing");
                assert!(message.contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!root.path().join("sha256:missing.tar").exists());
    }

    #[tokio::test]
    async fn test_download_layers_fetches_each_once() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let root = TempDir::new().unwrap();

        let digests = ["sha256:01", "sha256:02", "sha256:03", "sha256:04"];
        for (i, digest) in digests.iter().enumerate() {
            Mock::given(method("GET"))
                .and(path(format!("/v2/library/alpine/blobs/{}", digest)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![i as u8; 16]))
                .expect(1)
                .mount(&server)
                .await;
        }

        let layers: Vec<_> = digests.iter().map(|d| layer(d)).collect();
        let paths = client
            .download_layers("alpine", root.path(), &layers)
            .await
            .unwrap();

        assert_eq!(paths.len(), 4);
        for (i, path) in paths.iter().enumerate() {
            assert_eq!(path, &root.path().join(format!("{}.tar", digests[i])));
            assert_eq!(std::fs::read(path).unwrap(), vec![i as u8; 16]);
        }
    }

    #[tokio::test]
    async fn test_download_layer_rejects_malformed_digest() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let base = TempDir::new().unwrap();
        let root = base.path().join("root");
        std::fs::create_dir(&root).unwrap();

        let err = client
            .download_layer("alpine", &root, "../../escaped")
            .await
            .unwrap_err();
        match err {
            SkiffError::BlobDownload { digest, message } => {
                assert_eq!(digest, "../../escaped");
                assert!(message.contains("malformed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!base.path().join("escaped.tar").exists());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_layers_shares_duplicate_digest() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let root = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:aa"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"base".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:bb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"top".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let layers = vec![layer("sha256:aa"), layer("sha256:bb"), layer("sha256:aa")];
        let paths = client
            .download_layers("alpine", root.path(), &layers)
            .await
            .unwrap();

        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], paths[2]);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"base");
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"top");
        server.verify().await;
    }

    #[tokio::test]
    async fn test_download_layers_surfaces_single_failure() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let root = TempDir::new().unwrap();

        for digest in ["sha256:0a", "sha256:0c"] {
            Mock::given(method("GET"))
                .and(path(format!("/v2/library/alpine/blobs/{}", digest)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_bytes(b"data".to_vec())
                        .set_delay(Duration::from_millis(50)),
                )
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/blobs/sha256:0b"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let layers = vec![layer("sha256:0a"), layer("sha256:0b"), layer("sha256:0c")];
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            client.download_layers("alpine", root.path(), &layers),
        )
        .await
        .expect("fan-in must not hang");

        match result.unwrap_err() {
            SkiffError::BlobDownload { digest, message } => {
                assert_eq!(digest, "sha256:0b");
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_join_downloads_names_panicked_task() {
        let mut tasks: JoinSet<Result<PathBuf>> = JoinSet::new();
        let mut digests_by_task = HashMap::new();

        let ok = tasks.spawn(async { Ok(PathBuf::from("ok.tar")) });
        digests_by_task.insert(ok.id(), "sha256:fine".to_string());
        let boom = tasks.spawn(async { panic!("writer crashed") });
        digests_by_task.insert(boom.id(), "sha256:boom".to_string());

        let err = join_downloads("alpine", tasks, digests_by_task)
            .await
            .unwrap_err();
        match err {
            SkiffError::BlobDownload { digest, message } => {
                assert_eq!(digest, "sha256:boom");
                assert!(message.contains("download task failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_download_layers_empty() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let root = TempDir::new().unwrap();

        let paths = client
            .download_layers("alpine", root.path(), &[])
            .await
            .unwrap();
        assert!(paths.is_empty());
    }
}
