//! Identity resolution: which project logs belong to, and the bearer token
//! used to call the logging API.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;

use self::jwt::{Assertion, Token};
use crate::utils::timestamp;

pub use self::error::{AuthError, Result};
pub use self::jwt::ServiceAccountKey;

mod error;
mod jwt;

/// OAuth 2.0 scope for reading and writing log entries.
pub const LOGGING_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/logging.read",
];

/// Refresh tokens this many seconds before they actually expire.
const EXPIRY_MARGIN_SECS: u64 = 30;

/// Resolves the project that log names are scoped to.
#[async_trait]
pub trait ProjectIdProvider: Send + Sync {
    async fn project_id(&self) -> Result<String>;
}

/// Supplies the `Authorization` header value for API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A project id known up front, e.g. from configuration.
#[derive(Debug, Clone)]
pub struct StaticProjectId(pub String);

#[async_trait]
impl ProjectIdProvider for StaticProjectId {
    async fn project_id(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(AuthError::MissingProjectId);
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
struct CachedToken {
    bearer: String,
    expires_at: u64,
}

/// Service-account credentials exchanging signed JWT assertions for access tokens.
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    key: Arc<ServiceAccountKey>,
    scopes: String,
    user_email: Option<String>,
    cached: Arc<Mutex<Option<CachedToken>>>,
    http_client: Client,
}

impl ServiceAccount {
    /// Creates a new service account from a key file and scopes
    pub fn from_file(key_path: impl AsRef<Path>, scopes: &[&str]) -> Result<Self> {
        Ok(Self::from_key(ServiceAccountKey::from_file(key_path)?, scopes))
    }

    pub fn from_bytes(bytes: &[u8], scopes: &[&str]) -> Result<Self> {
        Ok(Self::from_key(ServiceAccountKey::from_bytes(bytes)?, scopes))
    }

    pub fn from_key(key: ServiceAccountKey, scopes: &[&str]) -> Self {
        Self {
            key: Arc::new(key),
            scopes: scopes.join(" "),
            user_email: None,
            cached: Arc::new(Mutex::new(None)),
            http_client: Client::new(),
        }
    }

    /// Impersonate `user_email` via domain-wide delegation.
    pub fn with_user_email(mut self, user_email: impl Into<String>) -> Self {
        self.user_email = Some(user_email.into());
        self
    }

    pub fn key(&self) -> &ServiceAccountKey {
        &self.key
    }

    async fn exchange_assertion(&self) -> Result<Token> {
        let mut assertion = Assertion::new(&self.key, &self.scopes)?;
        if let Some(ref user_email) = self.user_email {
            assertion = assertion.subject(user_email);
        }

        self.http_client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &assertion.sign()?),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Token>()
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl TokenSource for ServiceAccount {
    /// Returns the cached token while it is still valid, otherwise exchanges a
    /// fresh JWT assertion for a new one.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > timestamp()? {
                return Ok(token.bearer.clone());
            }
        }

        let token = self.exchange_assertion().await?;
        let bearer = token.bearer_token();
        *cached = Some(CachedToken {
            bearer: bearer.clone(),
            expires_at: (timestamp()? + token.expires_in).saturating_sub(EXPIRY_MARGIN_SECS),
        });
        tracing::debug!(expires_in = token.expires_in, "refreshed access token");

        Ok(bearer)
    }
}

#[async_trait]
impl ProjectIdProvider for ServiceAccount {
    async fn project_id(&self) -> Result<String> {
        StaticProjectId(self.key.project_id.clone()).project_id().await
    }
}
