//! In-memory catalog for deterministic testing.
//!
//! ```rust
//! use pvw_client::mock::MockCatalog;
//!
//! let catalog = MockCatalog::new()
//!     .with_entity("DataSet", "ds://sales", "guid-1")
//!     .fail_batch(2);
//! assert_eq!(catalog.create_calls(), 0);
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pvw_core::{Error, Result};

use crate::client::CatalogApi;
use crate::types::*;

#[derive(Default)]
struct MockState {
    entities: Vec<AtlasEntity>,
    created: Vec<AtlasEntity>,
    create_calls: usize,
    failing_batches: HashSet<usize>,
    classification_requests: Vec<ClassificationRequest>,
    fail_lookups: bool,
}

/// Mock catalog recording every call.
#[derive(Clone, Default)]
pub struct MockCatalog {
    state: Arc<Mutex<MockState>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register an entity resolvable by qualified name and guid.
    pub fn with_entity(self, type_name: &str, qualified_name: &str, guid: &str) -> Self {
        let mut entity = AtlasEntity::new(type_name);
        entity.guid = Some(guid.to_string());
        entity
            .attributes
            .insert("qualifiedName".into(), qualified_name.into());
        entity.attributes.insert(
            "name".into(),
            qualified_name.rsplit('/').next().unwrap_or(qualified_name).into(),
        );
        self.lock().entities.push(entity);
        self
    }

    /// Make the Nth (0-based) `create_entities` call fail.
    pub fn fail_batch(self, index: usize) -> Self {
        self.lock().failing_batches.insert(index);
        self
    }

    /// Make every lookup fail with a catalog error.
    pub fn fail_lookups(self) -> Self {
        self.lock().fail_lookups = true;
        self
    }

    /// Entities accepted by successful `create_entities` calls.
    pub fn created_entities(&self) -> Vec<AtlasEntity> {
        self.lock().created.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn classification_requests(&self) -> Vec<ClassificationRequest> {
        self.lock().classification_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned lock only happens after a panicking test
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CatalogApi for MockCatalog {
    async fn create_entities(&self, entities: &[AtlasEntity]) -> Result<EntityMutationResponse> {
        let mut state = self.lock();
        let call = state.create_calls;
        state.create_calls += 1;
        if state.failing_batches.contains(&call) {
            return Err(Error::Catalog("HTTP 503: service unavailable".to_string()));
        }

        let mut headers = Vec::with_capacity(entities.len());
        for entity in entities {
            let guid = format!("mock-{}", state.entities.len() + 1);
            let mut stored = entity.clone();
            stored.guid = Some(guid.clone());
            state.entities.push(stored);
            state.created.push(entity.clone());
            headers.push(EntityHeader {
                guid: Some(guid),
                type_name: Some(entity.type_name.clone()),
                attributes: Default::default(),
            });
        }

        let mut response = EntityMutationResponse::default();
        response.mutated_entities.insert("CREATE".to_string(), headers);
        Ok(response)
    }

    async fn get_entity_by_qualified_name(
        &self,
        type_name: &str,
        qualified_name: &str,
    ) -> Result<Option<AtlasEntity>> {
        let state = self.lock();
        if state.fail_lookups {
            return Err(Error::Catalog("lookup unavailable".to_string()));
        }
        Ok(state
            .entities
            .iter()
            .find(|e| e.type_name == type_name && e.qualified_name() == Some(qualified_name))
            .cloned())
    }

    async fn get_entity(&self, guid: &str) -> Result<Option<AtlasEntity>> {
        Ok(self
            .lock()
            .entities
            .iter()
            .find(|e| e.guid.as_deref() == Some(guid))
            .cloned())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let type_filter = request
            .filter
            .as_ref()
            .and_then(|f| f.get("entityType"))
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let keywords = request.keywords.trim();

        let value: Vec<SearchHit> = self
            .lock()
            .entities
            .iter()
            .filter(|e| type_filter.as_deref().map_or(true, |t| e.type_name == t))
            .filter(|e| {
                keywords == "*"
                    || keywords.is_empty()
                    || e.qualified_name().is_some_and(|qn| qn.contains(keywords))
            })
            .take(request.limit as usize)
            .map(|e| SearchHit {
                id: e.guid.clone().unwrap_or_default(),
                qualified_name: e.qualified_name().map(str::to_string),
                name: e
                    .attributes
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(str::to_string),
                entity_type: Some(e.type_name.clone()),
            })
            .collect();

        Ok(SearchResponse {
            search_count: value.len() as u64,
            value,
        })
    }

    async fn add_classification(&self, request: &ClassificationRequest) -> Result<()> {
        self.lock().classification_requests.push(request.clone());
        Ok(())
    }
}
