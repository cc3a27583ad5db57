//! Purview catalog client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use pvw_core::{defaults, Error, Result};

use crate::auth::{AuthError, ClientCredentialsProvider, TokenProvider};
use crate::config::PurviewConfig;
use crate::types::*;

const ATLAS_PREFIX: &str = "/datamap/api/atlas/v2";

/// Catalog operations used by the batch processor and job handlers.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Create or update entities in one bulk request.
    async fn create_entities(&self, entities: &[AtlasEntity]) -> Result<EntityMutationResponse>;

    /// Look up an entity by type and qualified name.
    async fn get_entity_by_qualified_name(
        &self,
        type_name: &str,
        qualified_name: &str,
    ) -> Result<Option<AtlasEntity>>;

    /// Fetch an entity by guid.
    async fn get_entity(&self, guid: &str) -> Result<Option<AtlasEntity>>;

    /// Keyword search.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;

    /// Attach one classification to many entities.
    async fn add_classification(&self, request: &ClassificationRequest) -> Result<()>;
}

/// HTTP client for a Purview account.
pub struct PurviewClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl PurviewClient {
    /// Create a client that authenticates with the configured service principal.
    pub fn new(config: &PurviewConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        let tokens = ClientCredentialsProvider::new(http.clone(), config)?;

        info!(
            subsystem = "client",
            component = "purview",
            account = %config.account_name,
            region = config.region.as_deref().unwrap_or("unspecified"),
            "Initializing Purview client"
        );

        Ok(Self {
            http,
            base_url: config.base_url(),
            tokens: Arc::new(tokens),
        })
    }

    /// Create a client with an explicit token source.
    pub fn with_token_provider(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Send a request, retrying once with a fresh token on 401.
    ///
    /// Returns `None` on 404.
    async fn send<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Option<T>> {
        let mut refreshed = false;
        loop {
            let token = self.tokens.token().await?;
            let response = build().bearer_auth(token).send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed {
                debug!(
                    subsystem = "client",
                    component = "purview",
                    "Access token rejected, refreshing"
                );
                self.tokens.invalidate().await;
                refreshed = true;
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(AuthError::TokenExpired.into());
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    subsystem = "client",
                    component = "purview",
                    status = status.as_u16(),
                    "Catalog request failed"
                );
                return Err(Error::Catalog(format!("HTTP {}: {}", status.as_u16(), body)));
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Ok(Some(serde_json::from_str("null")?));
            }
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// `path` followed by `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, path: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| Error::Config(format!("Invalid catalog URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid catalog URL: {}", self.base_url)))?
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl CatalogApi for PurviewClient {
    async fn create_entities(&self, entities: &[AtlasEntity]) -> Result<EntityMutationResponse> {
        let body = BulkCreateRequest { entities };
        let path = format!("{}/entity/bulk", ATLAS_PREFIX);
        self.send(|| self.request(Method::POST, &path).json(&body))
            .await?
            .ok_or_else(|| Error::Catalog("bulk create endpoint not found".to_string()))
    }

    async fn get_entity_by_qualified_name(
        &self,
        type_name: &str,
        qualified_name: &str,
    ) -> Result<Option<AtlasEntity>> {
        let url = self.endpoint(
            &format!("{}/entity/uniqueAttribute/type", ATLAS_PREFIX),
            &[type_name],
        )?;
        let found: Option<EntityWithExtInfo> = self
            .send(|| {
                self.http
                    .request(Method::GET, url.clone())
                    .query(&[("attr:qualifiedName", qualified_name)])
            })
            .await?;
        Ok(found.map(|e| e.entity))
    }

    async fn get_entity(&self, guid: &str) -> Result<Option<AtlasEntity>> {
        let url = self.endpoint(&format!("{}/entity/guid", ATLAS_PREFIX), &[guid])?;
        let found: Option<EntityWithExtInfo> = self
            .send(|| self.http.request(Method::GET, url.clone()))
            .await?;
        Ok(found.map(|e| e.entity))
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let found: Option<SearchResponse> = self
            .send(|| {
                self.request(Method::POST, "/datamap/api/search/query")
                    .query(&[("api-version", defaults::PURVIEW_API_VERSION)])
                    .json(request)
            })
            .await?;
        Ok(found.unwrap_or_default())
    }

    async fn add_classification(&self, request: &ClassificationRequest) -> Result<()> {
        let path = format!("{}/entity/bulk/classification", ATLAS_PREFIX);
        let applied: Option<serde_json::Value> = self
            .send(|| self.request(Method::POST, &path).json(request))
            .await?;
        match applied {
            Some(_) => Ok(()),
            None => Err(Error::Catalog(format!(
                "classification '{}' not applied: bulk classification endpoint returned 404",
                request.classification.type_name
            ))),
        }
    }
}
