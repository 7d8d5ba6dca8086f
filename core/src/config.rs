use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SkiffError};

/// Docker Hub registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// Docker Hub token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";

/// `service` parameter the Docker Hub token endpoint expects.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// Upper bound on a whole pull (resolution, downloads, extraction).
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 300;

/// Registry client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry serving `/v2/...`
    pub registry_url: String,

    /// Base URL of the token service serving `/token`
    pub auth_url: String,

    /// `service` query parameter sent to the token service
    pub service: String,

    /// Pull timeout in seconds
    pub pull_timeout_secs: u64,

    /// Target platform as `os/arch`; the host platform when unset
    pub platform: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            service: DEFAULT_AUTH_SERVICE.to_string(),
            pull_timeout_secs: DEFAULT_PULL_TIMEOUT_SECS,
            platform: None,
        }
    }
}

impl RegistryConfig {
    /// Build the configuration from environment variables.
    ///
    /// Reads `SKIFF_REGISTRY_URL`, `SKIFF_AUTH_URL`, `SKIFF_AUTH_SERVICE`,
    /// `SKIFF_PULL_TIMEOUT_SECS` and `SKIFF_PLATFORM`, falling back to the
    /// Docker Hub defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var("SKIFF_REGISTRY_URL") {
            config.registry_url = url;
        }
        if let Some(url) = env_var("SKIFF_AUTH_URL") {
            config.auth_url = url;
        }
        if let Some(service) = env_var("SKIFF_AUTH_SERVICE") {
            config.service = service;
        }
        if let Some(secs) = env_var("SKIFF_PULL_TIMEOUT_SECS") {
            config.pull_timeout_secs = secs.parse().map_err(|_| {
                SkiffError::ConfigError(format!(
                    "SKIFF_PULL_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    secs
                ))
            })?;
        }
        if let Some(platform) = env_var("SKIFF_PLATFORM") {
            config.platform = Some(platform);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("registry_url", &self.registry_url), ("auth_url", &self.auth_url)] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(SkiffError::ConfigError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }
        if self.pull_timeout_secs == 0 {
            return Err(SkiffError::ConfigError(
                "pull timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Pull timeout as a `Duration`.
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    /// Registry base URL without a trailing slash.
    pub fn registry_base(&self) -> &str {
        self.registry_url.trim_end_matches('/')
    }

    /// Token service base URL without a trailing slash.
    pub fn auth_base(&self) -> &str {
        self.auth_url.trim_end_matches('/')
    }
}

/// Launcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Directory the ephemeral root is created in (system temp dir if unset)
    pub root_base: Option<PathBuf>,

    /// Leave the root directory behind after the command exits
    pub keep_root: bool,
}

impl LaunchConfig {
    /// Build the launcher configuration from `SKIFF_ROOT_BASE` and `SKIFF_KEEP_ROOT`.
    pub fn from_env() -> Result<Self> {
        let root_base = env_var("SKIFF_ROOT_BASE").map(PathBuf::from);
        let keep_root = match env_var("SKIFF_KEEP_ROOT").as_deref() {
            None | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(SkiffError::ConfigError(format!(
                    "SKIFF_KEEP_ROOT must be true/false/1/0, got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            root_base,
            keep_root,
        })
    }
}

/// Read a non-empty environment variable.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const REGISTRY_VARS: &[&str] = &[
        "SKIFF_REGISTRY_URL",
        "SKIFF_AUTH_URL",
        "SKIFF_AUTH_SERVICE",
        "SKIFF_PULL_TIMEOUT_SECS",
        "SKIFF_PLATFORM",
    ];

    fn clear(vars: &[&str]) {
        for var in vars {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_registry_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.registry_url, "https://registry.hub.docker.com");
        assert_eq!(config.auth_url, "https://auth.docker.io");
        assert_eq!(config.service, "registry.docker.io");
        assert_eq!(config.pull_timeout(), Duration::from_secs(300));
        assert!(config.platform.is_none());
    }

    #[test]
    #[serial]
    fn test_registry_config_from_env_defaults() {
        clear(REGISTRY_VARS);
        let config = RegistryConfig::from_env().unwrap();
        assert_eq!(config, RegistryConfig::default());
    }

    #[test]
    #[serial]
    fn test_registry_config_from_env_overrides() {
        clear(REGISTRY_VARS);
        std::env::set_var("SKIFF_REGISTRY_URL", "http://127.0.0.1:5000/");
        std::env::set_var("SKIFF_AUTH_URL", "http://127.0.0.1:5001");
        std::env::set_var("SKIFF_AUTH_SERVICE", "local");
        std::env::set_var("SKIFF_PULL_TIMEOUT_SECS", "30");
        std::env::set_var("SKIFF_PLATFORM", "linux/arm64");

        let config = RegistryConfig::from_env().unwrap();
        assert_eq!(config.registry_base(), "http://127.0.0.1:5000");
        assert_eq!(config.auth_base(), "http://127.0.0.1:5001");
        assert_eq!(config.service, "local");
        assert_eq!(config.pull_timeout_secs, 30);
        assert_eq!(config.platform.as_deref(), Some("linux/arm64"));

        clear(REGISTRY_VARS);
    }

    #[test]
    #[serial]
    fn test_registry_config_bad_timeout() {
        clear(REGISTRY_VARS);
        std::env::set_var("SKIFF_PULL_TIMEOUT_SECS", "soon");

        let err = RegistryConfig::from_env().unwrap_err();
        assert!(matches!(err, SkiffError::ConfigError(_)));

        clear(REGISTRY_VARS);
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = RegistryConfig {
            registry_url: "ftp://registry".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RegistryConfig {
            pull_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_launch_config_from_env() {
        clear(&["SKIFF_ROOT_BASE", "SKIFF_KEEP_ROOT"]);
        assert_eq!(LaunchConfig::from_env().unwrap(), LaunchConfig::default());

        std::env::set_var("SKIFF_ROOT_BASE", "/var/tmp");
        std::env::set_var("SKIFF_KEEP_ROOT", "true");
        let config = LaunchConfig::from_env().unwrap();
        assert_eq!(config.root_base, Some(PathBuf::from("/var/tmp")));
        assert!(config.keep_root);

        std::env::set_var("SKIFF_KEEP_ROOT", "maybe");
        assert!(LaunchConfig::from_env().is_err());

        clear(&["SKIFF_ROOT_BASE", "SKIFF_KEEP_ROOT"]);
    }
}
