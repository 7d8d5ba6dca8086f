//! Bearer-token authentication for registry requests.
//!
//! Tokens are fetched anonymously from the Docker Hub token service and
//! cached per `(image, scope)` until `issued_at + expires_in`. The cache sits
//! behind one async mutex that is held across a refresh, so concurrent
//! layer downloads for the same image share a single token request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use skiff_core::config::RegistryConfig;
use skiff_core::error::{Result, SkiffError};
use tokio::sync::Mutex;

/// Lifetime assumed when the token service omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60;

/// Access requested from the token service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Pull,
    Push,
    PullPush,
}

impl Scope {
    /// Wire form used in the `scope` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Pull => "pull",
            Scope::Push => "push",
            Scope::PullPush => "pull,push",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bearer token as issued by the token service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub access_token: String,
    pub expires_in: i64,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    /// Instant after which the token must not be used.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.expires_in)
    }

    /// Whether the token is still usable at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

/// Token service response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    issued_at: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, now: DateTime<Utc>) -> Option<Credential> {
        let token = self
            .token
            .clone()
            .or_else(|| self.access_token.clone())
            .filter(|t| !t.is_empty())?;
        let access_token = self.access_token.unwrap_or_else(|| token.clone());
        let expires_in = self
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let issued_at = self
            .issued_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        Some(Credential {
            token,
            access_token,
            expires_in,
            issued_at,
        })
    }
}

/// Attaches credentials to outbound registry requests.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Add an `Authorization` header valid for `image` with `scope`.
    async fn authenticate(
        &self,
        request: &mut reqwest::Request,
        image: &str,
        scope: Scope,
    ) -> Result<()>;
}

/// Source of the current time, injectable for expiry tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type CacheKey = (String, Scope);

/// Anonymous token authenticator with a per-`(image, scope)` cache.
pub struct TokenAuthenticator {
    http: reqwest::Client,
    auth_base: String,
    service: String,
    cache: Mutex<HashMap<CacheKey, Credential>>,
    clock: Clock,
}

impl TokenAuthenticator {
    /// Create an authenticator for the token service named in `config`.
    pub fn new(http: reqwest::Client, config: &RegistryConfig) -> Self {
        Self {
            http,
            auth_base: config.auth_base().to_string(),
            service: config.service.clone(),
            cache: Mutex::new(HashMap::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Cached credential for `(image, scope)`, if any, without validating it.
    pub async fn cached(&self, image: &str, scope: Scope) -> Option<Credential> {
        self.cache
            .lock()
            .await
            .get(&(image.to_string(), scope))
            .cloned()
    }

    /// Drop the cached credential for `(image, scope)`.
    pub async fn invalidate(&self, image: &str, scope: Scope) -> bool {
        self.cache
            .lock()
            .await
            .remove(&(image.to_string(), scope))
            .is_some()
    }

    /// Return a valid token, fetching a new one on miss or expiry.
    pub async fn token(&self, image: &str, scope: Scope) -> Result<String> {
        let key = (image.to_string(), scope);
        let mut cache = self.cache.lock().await;

        if let Some(credential) = cache.get(&key) {
            let now = (self.clock)();
            if credential.is_valid_at(now) {
                tracing::trace!(image = %image, scope = %scope, "Using cached registry token");
                return Ok(credential.token.clone());
            }
            tracing::debug!(
                image = %image,
                scope = %scope,
                expired_at = %credential.expires_at(),
                "Registry token expired"
            );
            cache.remove(&key);
        }

        let credential = self.fetch(image, scope).await?;
        let token = credential.token.clone();
        cache.insert(key, credential);
        Ok(token)
    }

    async fn fetch(&self, image: &str, scope: Scope) -> Result<Credential> {
        let url = format!("{}/token", self.auth_base);
        let scope_param = format!("repository:library/{}:{}", image, scope);

        tracing::debug!(image = %image, scope = %scope, "Requesting registry token");

        let auth_err = |message: String| SkiffError::Auth {
            image: image.to_string(),
            message,
        };

        let response = self
            .http
            .get(&url)
            .query(&[("service", self.service.as_str()), ("scope", scope_param.as_str())])
            .send()
            .await
            .map_err(|e| auth_err(format!("token request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(auth_err(format!("token service returned {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| auth_err(format!("failed to read token response: {}", e)))?;
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| auth_err(format!("undecodable token response: {}", e)))?;

        parsed
            .into_credential((self.clock)())
            .ok_or_else(|| auth_err("token response carried no token".to_string()))
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(
        &self,
        request: &mut reqwest::Request,
        image: &str,
        scope: Scope,
    ) -> Result<()> {
        let token = self.token(image, scope).await?;
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            SkiffError::Auth {
                image: image.to_string(),
                message: format!("token is not a valid header value: {}", e),
            }
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}
