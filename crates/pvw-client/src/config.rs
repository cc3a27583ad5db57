//! Purview account and Azure AD credential configuration.

use std::time::Duration;

use pvw_core::{defaults, Error, Result};

/// Default Azure AD authority host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// OAuth scope for the Purview data plane.
pub const PURVIEW_SCOPE: &str = "https://purview.azure.net/.default";

/// Connection settings for a Purview account.
#[derive(Debug, Clone)]
pub struct PurviewConfig {
    /// Purview account name (`<account>.purview.azure.com`).
    pub account_name: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Informational; included in logs.
    pub region: Option<String>,
    /// Overrides `https://<account>.purview.azure.com`.
    pub endpoint: Option<String>,
    /// Overrides [`DEFAULT_AUTHORITY_HOST`].
    pub authority_host: String,
    pub timeout: Duration,
    /// Entities per bulk request.
    pub batch_size: usize,
}

impl PurviewConfig {
    /// Build from explicit values with defaults for everything else.
    pub fn new(
        account_name: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            region: None,
            endpoint: None,
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            timeout: Duration::from_secs(defaults::PURVIEW_TIMEOUT_SECS),
            batch_size: defaults::IMPORT_BATCH_SIZE,
        }
    }

    /// Load from environment variables.
    ///
    /// Required: `PURVIEW_ACCOUNT_NAME`, `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
    /// `AZURE_CLIENT_SECRET`. Optional: `AZURE_REGION`, `PURVIEW_ENDPOINT`,
    /// `AZURE_AUTHORITY_HOST`, `PURVIEW_TIMEOUT_SECS`, `IMPORT_BATCH_SIZE`.
    pub fn from_env() -> Result<Self> {
        let mut missing = Vec::new();
        let mut required = |name: &'static str| match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => v,
            _ => {
                missing.push(name);
                String::new()
            }
        };

        let account_name = required("PURVIEW_ACCOUNT_NAME");
        let tenant_id = required("AZURE_TENANT_ID");
        let client_id = required("AZURE_CLIENT_ID");
        let client_secret = required("AZURE_CLIENT_SECRET");

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let mut config = Self::new(account_name, tenant_id, client_id, client_secret);
        config.region = std::env::var("AZURE_REGION").ok();
        config.endpoint = std::env::var("PURVIEW_ENDPOINT").ok();
        if let Ok(host) = std::env::var("AZURE_AUTHORITY_HOST") {
            config.authority_host = host;
        }
        if let Some(secs) = std::env::var("PURVIEW_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(size) = std::env::var("IMPORT_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.batch_size = size;
        }
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Base URL of the account's data plane.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.purview.azure.com", self.account_name),
        }
    }

    /// Azure AD token endpoint for the tenant.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}
