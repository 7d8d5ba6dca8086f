//! Registry client for the Docker Hub v2 API.
//!
//! Every request goes through an [`Authenticator`] before it is sent. The
//! client is cheap to clone, so each concurrent layer download task gets its
//! own handle onto the shared HTTP pool and token cache.

use std::sync::Arc;

use reqwest::header::{HeaderValue, ACCEPT};
use skiff_core::config::RegistryConfig;
use skiff_core::error::{Result, SkiffError};

use super::auth::{Authenticator, Scope, TokenAuthenticator};
use super::manifest::Platform;

/// Kind of object addressed under `/v2/library/<image>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Manifests,
    Blobs,
}

impl Endpoint {
    fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Manifests => "manifests",
            Endpoint::Blobs => "blobs",
        }
    }
}

/// Pulls manifests and blobs from a registry.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    config: Arc<RegistryConfig>,
    auth: Arc<dyn Authenticator>,
    platform: Platform,
}

impl RegistryClient {
    /// Create a client using anonymous bearer tokens from the configured token service.
    ///
    /// The target platform is taken from `config.platform` when set, otherwise
    /// from the host.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http = build_http_client()?;
        let auth = Arc::new(TokenAuthenticator::new(http.clone(), &config));
        Self::with_parts(http, config, auth)
    }

    /// Create a client with a caller-supplied authenticator.
    pub fn with_authenticator(
        config: RegistryConfig,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        Self::with_parts(build_http_client()?, config, auth)
    }

    fn with_parts(
        http: reqwest::Client,
        config: RegistryConfig,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        config.validate()?;
        let platform = match config.platform.as_deref() {
            Some(value) => Platform::parse(value)?,
            None => Platform::host(),
        };

        Ok(Self {
            http,
            config: Arc::new(config),
            auth,
            platform,
        })
    }

    /// Override the platform used to pick an entry from an image index.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Platform this client resolves images for.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Configuration this client was built from.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// URL of a manifest or blob for a `library/` image.
    pub(crate) fn url(&self, image: &str, endpoint: Endpoint, reference: &str) -> String {
        format!(
            "{}/v2/library/{}/{}/{}",
            self.config.registry_base(),
            image,
            endpoint.as_str(),
            reference
        )
    }

    /// Build a GET request with `Accept` set and a pull token attached.
    ///
    /// Request-building failures are reported through `on_build_error` so each
    /// caller keeps its own error variant; token failures stay `Auth` errors.
    pub(crate) async fn authorized_get(
        &self,
        image: &str,
        url: &str,
        accept: &str,
        on_build_error: impl Fn(String) -> SkiffError,
    ) -> Result<reqwest::Request> {
        let accept = HeaderValue::from_str(accept)
            .map_err(|e| on_build_error(format!("invalid Accept header: {}", e)))?;
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, accept)
            .build()
            .map_err(|e| on_build_error(format!("invalid request for {}: {}", url, e)))?;

        self.auth
            .authenticate(&mut request, image, Scope::Pull)
            .await?;
        Ok(request)
    }

    /// Send a prepared request.
    pub(crate) async fn execute(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.http.execute(request).await
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("skiff/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SkiffError::ConfigError(format!("failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_layout() {
        let client = RegistryClient::new(RegistryConfig::default()).unwrap();
        assert_eq!(
            client.url("alpine", Endpoint::Manifests, "3.19"),
            "https://registry.hub.docker.com/v2/library/alpine/manifests/3.19"
        );
        assert_eq!(
            client.url("alpine", Endpoint::Blobs, "sha256:abc"),
            "https://registry.hub.docker.com/v2/library/alpine/blobs/sha256:abc"
        );
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let config = RegistryConfig {
            registry_url: "http://127.0.0.1:5000/".to_string(),
            ..Default::default()
        };
        let client = RegistryClient::new(config).unwrap();
        assert_eq!(
            client.url("busybox", Endpoint::Manifests, "latest"),
            "http://127.0.0.1:5000/v2/library/busybox/manifests/latest"
        );
    }

    #[test]
    fn test_platform_from_config() {
        let config = RegistryConfig {
            platform: Some("linux/arm64".to_string()),
            ..Default::default()
        };
        let client = RegistryClient::new(config).unwrap();
        assert_eq!(client.platform(), &Platform::new("arm64", "linux"));
    }

    #[test]
    fn test_platform_defaults_to_host() {
        let client = RegistryClient::new(RegistryConfig::default()).unwrap();
        assert_eq!(client.platform(), &Platform::host());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RegistryConfig {
            pull_timeout_secs: 0,
            ..Default::default()
        };
        assert!(RegistryClient::new(config).is_err());
    }
}
