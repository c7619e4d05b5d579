//! Document-store projection.
//!
//! Each surviving entry becomes one flat JSON object inside the
//! `searchIndices` array of the resource document:
//!
//! ```json
//! { "p": "code-value-quantity", "system_0": "http://loinc.org", "code_0": "8480-6", "qlow_1": 120, "qhigh_1": 120 }
//! ```

use serde_json::{Map, Number, Value, json};

use crate::config::SearchIndexConfig;
use crate::error::IndexResult;
use crate::types::{Literal, ResourceWrapper, SearchIndexEntry, format_timestamp};

use super::policy::{IndexPolicy, IndexProperty, ProjectionStats};
use super::pool::GeneratorPool;

/// Property holding the parameter name in every index object.
pub const PARAM_PROPERTY: &str = "p";

/// Array holding the index objects in the document envelope.
pub const SEARCH_INDICES_PROPERTY: &str = "searchIndices";

/// A projected resource document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentProjection {
    /// The full document envelope, including `searchIndices`.
    pub document: Value,
    /// What the policy kept and dropped.
    pub stats: ProjectionStats,
}

/// Builds document-store envelopes with embedded search indices.
#[derive(Debug)]
pub struct DocumentIndexGenerator {
    policy: IndexPolicy,
    key: String,
}

impl DocumentIndexGenerator {
    /// Creates a generator.
    pub fn new(config: &SearchIndexConfig) -> Self {
        Self {
            policy: IndexPolicy::new(config.max_index_combinations_per_type),
            key: String::with_capacity(32),
        }
    }

    /// Creates a pool of generators sized by `document_pool_size`.
    pub fn pool(config: &SearchIndexConfig) -> GeneratorPool<Self> {
        let config = config.clone();
        GeneratorPool::new(config.document_pool_size, move || Self::new(&config))
    }

    /// Projects one resource version into its document.
    pub fn generate(
        &mut self,
        resource: &ResourceWrapper,
        entries: &[SearchIndexEntry],
    ) -> IndexResult<DocumentProjection> {
        let (projected, stats) = self.policy.apply(entries)?;
        stats.log_drops(&resource.resource_type, &resource.resource_id);

        let indices: Vec<Value> = projected
            .iter()
            .map(|entry| {
                let mut object = Map::new();
                object.insert(
                    PARAM_PROPERTY.to_string(),
                    Value::String(entry.param.name.clone()),
                );
                for property in entry.properties() {
                    self.write_key(&property);
                    object.insert(self.key.clone(), literal_to_json(&property.value));
                }
                Value::Object(object)
            })
            .collect();

        let document = json!({
            "id": document_id(resource),
            "resourceTypeName": resource.resource_type,
            "resourceId": resource.resource_id,
            "version": resource.version_id,
            "isHistory": resource.is_history,
            "lastModified": format_timestamp(&resource.last_modified),
            "rawResource": resource.raw_resource,
            SEARCH_INDICES_PROPERTY: indices,
        });

        Ok(DocumentProjection { document, stats })
    }

    fn write_key(&mut self, property: &IndexProperty) {
        self.key.clear();
        self.key.push_str(property.field.subfield());
        if let Some(component) = property.component {
            self.key.push('_');
            self.key.push_str(&component.to_string());
        }
    }
}

/// Document id: the resource id for live versions, `id:version` for history.
pub fn document_id(resource: &ResourceWrapper) -> String {
    if resource.is_history {
        format!("{}:{}", resource.resource_id, resource.version_id)
    } else {
        resource.resource_id.clone()
    }
}

/// Property name of a sub-field inside an index object.
pub fn property_key(field: crate::types::FieldName, component: Option<usize>) -> String {
    match component {
        Some(i) => format!("{}_{}", field.subfield(), i),
        None => field.subfield().to_string(),
    }
}

/// Converts a literal to its stored JSON form.
///
/// Decimals become JSON numbers; timestamps become fixed-width strings so
/// that string comparison orders them chronologically.
pub fn literal_to_json(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Integer(i) => Value::Number((*i).into()),
        Literal::Decimal(d) => Number::from_f64(Literal::decimal_as_f64(d))
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(d.to_string())),
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::DateTime(dt) => Value::String(format_timestamp(dt)),
    }
}
