//! Typed request and response bodies for the Purview catalog API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A catalog entity in Atlas form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasEntity {
    pub type_name: String,
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<AtlasClassification>,
}

impl AtlasEntity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// The entity's `qualifiedName` attribute, if present.
    pub fn qualified_name(&self) -> Option<&str> {
        self.attributes.get("qualifiedName").and_then(JsonValue::as_str)
    }
}

/// A classification attached (or to attach) to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasClassification {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, JsonValue>,
}

impl AtlasClassification {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: Map::new(),
        }
    }
}

/// Body of `POST /datamap/api/atlas/v2/entity/bulk`.
#[derive(Debug, Clone, Serialize)]
pub struct BulkCreateRequest<'a> {
    pub entities: &'a [AtlasEntity],
}

/// Header of a mutated entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHeader {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
}

/// Response of an entity mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMutationResponse {
    /// Keyed by operation (`CREATE`, `UPDATE`, ...).
    #[serde(default)]
    pub mutated_entities: HashMap<String, Vec<EntityHeader>>,
    /// Temporary guid -> assigned guid.
    #[serde(default)]
    pub guid_assignments: HashMap<String, String>,
}

impl EntityMutationResponse {
    /// Entities created or updated by the request.
    pub fn mutated_count(&self) -> usize {
        self.mutated_entities.values().map(Vec::len).sum()
    }
}

/// Body of `GET .../entity/uniqueAttribute/...` and `GET .../entity/guid/{guid}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityWithExtInfo {
    pub entity: AtlasEntity,
}

/// Body of `POST /datamap/api/search/query`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub keywords: String,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<JsonValue>,
}

impl SearchRequest {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            limit: 50,
            filter: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Restrict results to one entity type.
    pub fn with_entity_type(mut self, type_name: impl Into<String>) -> Self {
        self.filter = Some(serde_json::json!({ "entityType": type_name.into() }));
        self
    }
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

/// Search response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(rename = "@search.count", default)]
    pub search_count: u64,
    #[serde(default)]
    pub value: Vec<SearchHit>,
}

/// Body of `POST /datamap/api/atlas/v2/entity/bulk/classification`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    pub classification: AtlasClassification,
    pub entity_guids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_serializes_camel_case() {
        let mut entity = AtlasEntity::new("azure_sql_table");
        entity
            .attributes
            .insert("qualifiedName".into(), json!("mssql://srv/db/dbo/orders"));
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["typeName"], "azure_sql_table");
        assert!(value.get("guid").is_none());
        assert!(value.get("classifications").is_none());
        assert_eq!(entity.qualified_name(), Some("mssql://srv/db/dbo/orders"));
    }

    #[test]
    fn test_mutation_response_count() {
        let response: EntityMutationResponse = serde_json::from_value(json!({
            "mutatedEntities": {
                "CREATE": [{"guid": "1", "typeName": "t"}, {"guid": "2", "typeName": "t"}],
                "UPDATE": [{"guid": "3", "typeName": "t"}]
            },
            "guidAssignments": {"-1": "1"}
        }))
        .unwrap();
        assert_eq!(response.mutated_count(), 3);
    }

    #[test]
    fn test_search_response_parses_count() {
        let response: SearchResponse = serde_json::from_value(json!({
            "@search.count": 2,
            "value": [
                {"id": "g1", "qualifiedName": "qn1", "name": "orders", "entityType": "azure_sql_table"},
                {"id": "g2"}
            ]
        }))
        .unwrap();
        assert_eq!(response.search_count, 2);
        assert_eq!(response.value[0].name.as_deref(), Some("orders"));
        assert!(response.value[1].qualified_name.is_none());
    }
}
