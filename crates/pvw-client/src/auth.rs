//! Azure AD authentication for the Purview data plane.
//!
//! [`ClientCredentialsProvider`] runs the OAuth2 client-credentials flow and
//! caches the access token until shortly before it expires. Token endpoint
//! failures are classified into [`AuthError`] variants so logs say *why*
//! authentication failed rather than just "400 Bad Request".

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{PurviewConfig, PURVIEW_SCOPE};

/// Tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Classified authentication failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Tenant, client ID or secret not configured
    #[error("Credentials missing: {0}")]
    CredentialsMissing(String),

    /// AADSTS700016: the application is not registered in the tenant
    #[error("Service principal not registered in tenant: {0}")]
    ServicePrincipalNotRegistered(String),

    /// AADSTS7000215 / AADSTS7000222: wrong or expired client secret
    #[error("Invalid client secret: {0}")]
    InvalidClientSecret(String),

    /// The catalog rejected a previously issued token
    #[error("Access token expired or revoked")]
    TokenExpired,

    /// Any other token endpoint failure
    #[error("Token request failed: {0}")]
    TokenRequest(String),
}

impl AuthError {
    /// Classify a failed token endpoint response.
    pub fn from_token_response(status: u16, body: &str) -> Self {
        let description = serde_json::from_str::<TokenErrorBody>(body)
            .map(|b| b.error_description.unwrap_or(b.error))
            .unwrap_or_else(|_| body.to_string());

        if description.contains("AADSTS700016") {
            AuthError::ServicePrincipalNotRegistered(description)
        } else if description.contains("AADSTS7000215") || description.contains("AADSTS7000222") {
            AuthError::InvalidClientSecret(description)
        } else if description.contains("AADSTS90002") {
            AuthError::CredentialsMissing(format!("tenant not found: {}", description))
        } else {
            AuthError::TokenRequest(format!("HTTP {}: {}", status, description))
        }
    }
}

impl From<AuthError> for pvw_core::Error {
    fn from(e: AuthError) -> Self {
        pvw_core::Error::Unauthorized(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Source of bearer tokens for catalog requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a valid access token, fetching a new one if needed.
    async fn token(&self) -> std::result::Result<String, AuthError>;

    /// Drop any cached token so the next call fetches a fresh one.
    async fn invalidate(&self);
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth2 client-credentials flow against Azure AD.
pub struct ClientCredentialsProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    pub fn new(client: Client, config: &PurviewConfig) -> std::result::Result<Self, AuthError> {
        let mut missing = Vec::new();
        if config.tenant_id.trim().is_empty() {
            missing.push("tenant_id");
        }
        if config.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if config.client_secret.trim().is_empty() {
            missing.push("client_secret");
        }
        if !missing.is_empty() {
            return Err(AuthError::CredentialsMissing(missing.join(", ")));
        }

        Ok(Self {
            client,
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> std::result::Result<CachedToken, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", PURVIEW_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenRequest(e.to_string()))?;

        if !status.is_success() {
            let err = AuthError::from_token_response(status.as_u16(), &body);
            warn!(
                subsystem = "client",
                component = "auth",
                status = status.as_u16(),
                error = %err,
                "Token request rejected"
            );
            return Err(err);
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::TokenRequest(format!("invalid token response: {}", e)))?;

        debug!(
            subsystem = "client",
            component = "auth",
            expires_in = token.expires_in,
            "Acquired access token"
        );

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn token(&self) -> std::result::Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

/// Fixed token, e.g. from `PURVIEW_ACCESS_TOKEN` or tests.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> std::result::Result<String, AuthError> {
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {}
}
