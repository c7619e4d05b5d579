//! Wide-column projection.
//!
//! A wide-column entity has no nested structure, so every projected property
//! is flattened into its own entity property:
//!
//! ```text
//! s_<param><slot>_<subfield>[<component>]
//! ```
//!
//! The slot is what lets a query on `identifier` match no matter which of
//! the parameter's occurrences carried the value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::SearchIndexConfig;
use crate::error::IndexResult;
use crate::types::{FieldName, Literal, ResourceWrapper, SearchIndexEntry};

use super::policy::{IndexPolicy, ProjectionStats};

/// Envelope property holding the logical id.
pub const RESOURCE_ID_PROPERTY: &str = "ResourceId";
/// Envelope property holding the version id.
pub const VERSION_PROPERTY: &str = "Version";
/// Envelope property holding the history flag.
pub const IS_HISTORY_PROPERTY: &str = "IsHistory";
/// Envelope property holding the last-modified instant.
pub const LAST_MODIFIED_PROPERTY: &str = "LastModified";
/// Envelope property holding the serialized resource.
pub const RAW_RESOURCE_PROPERTY: &str = "RawResource";

/// Separator between the id and version in history row keys.
pub const HISTORY_ROW_KEY_SEPARATOR: char = ':';

/// Builds the property name for one projected sub-field.
pub fn property_name(
    param_name: &str,
    slot: usize,
    field: FieldName,
    component: Option<usize>,
) -> String {
    let mut name = String::with_capacity(param_name.len() + 16);
    name.push_str("s_");
    name.extend(param_name.chars().filter(|c| c.is_ascii_alphanumeric()));
    name.push_str(&slot.to_string());
    name.push('_');
    name.push_str(field.subfield());
    if let Some(component) = component {
        name.push_str(&component.to_string());
    }
    name
}

/// A wide-column entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntity {
    /// Partition key: the resource type, or its history partition.
    pub partition_key: String,
    /// Row key: the id, or `id:version` for history rows.
    pub row_key: String,
    /// Store-maintained modification time.
    pub timestamp: DateTime<Utc>,
    /// All other properties.
    pub properties: BTreeMap<String, Literal>,
}

impl TableEntity {
    /// Returns a property value.
    pub fn get(&self, name: &str) -> Option<&Literal> {
        self.properties.get(name)
    }

    /// Rebuilds the resource envelope from the entity.
    ///
    /// With `identity_only` the raw resource is left out.
    pub fn to_resource(&self, resource_type: &str, identity_only: bool) -> ResourceWrapper {
        let text = |name: &str| {
            self.get(name)
                .and_then(Literal::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let raw_resource = if identity_only {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text(RAW_RESOURCE_PROPERTY)).unwrap_or_default()
        };
        let last_modified = match self.get(LAST_MODIFIED_PROPERTY) {
            Some(Literal::DateTime(dt)) => *dt,
            _ => self.timestamp,
        };

        ResourceWrapper {
            resource_type: resource_type.to_string(),
            resource_id: text(RESOURCE_ID_PROPERTY),
            version_id: text(VERSION_PROPERTY),
            last_modified,
            is_history: matches!(self.get(IS_HISTORY_PROPERTY), Some(Literal::Boolean(true))),
            raw_resource,
        }
    }
}

/// A projected entity and what the policy and budget kept.
#[derive(Debug, Clone, PartialEq)]
pub struct TableProjection {
    /// The entity to upsert.
    pub entity: TableEntity,
    /// What was kept and dropped.
    pub stats: ProjectionStats,
}

/// Builds wide-column entities.
#[derive(Debug, Clone)]
pub struct TableIndexGenerator {
    policy: IndexPolicy,
    budget: usize,
    history_suffix: String,
}

impl TableIndexGenerator {
    /// Creates a generator.
    pub fn new(config: &SearchIndexConfig) -> Self {
        Self {
            policy: IndexPolicy::new(config.max_index_combinations_per_type),
            budget: config.table_property_budget(),
            history_suffix: config.history_partition_suffix.clone(),
        }
    }

    /// Projects one resource version into its entity.
    ///
    /// Once an entry would push the entity past its property budget, that
    /// entry and every later one are dropped.
    pub fn generate(
        &self,
        resource: &ResourceWrapper,
        entries: &[SearchIndexEntry],
    ) -> IndexResult<TableProjection> {
        let (projected, mut stats) = self.policy.apply(entries)?;

        let mut properties = BTreeMap::new();
        properties.insert(
            RESOURCE_ID_PROPERTY.to_string(),
            Literal::string(&resource.resource_id),
        );
        properties.insert(
            VERSION_PROPERTY.to_string(),
            Literal::string(&resource.version_id),
        );
        properties.insert(
            IS_HISTORY_PROPERTY.to_string(),
            Literal::Boolean(resource.is_history),
        );
        properties.insert(
            LAST_MODIFIED_PROPERTY.to_string(),
            Literal::DateTime(resource.last_modified),
        );
        properties.insert(
            RAW_RESOURCE_PROPERTY.to_string(),
            Literal::String(resource.raw_resource.to_string()),
        );

        let mut used = 0usize;
        for (i, entry) in projected.iter().enumerate() {
            let entry_properties = entry.properties();
            if used + entry_properties.len() > self.budget {
                let remaining = projected.len() - i;
                stats.dropped_by_budget += remaining;
                stats.kept -= remaining;
                break;
            }
            used += entry_properties.len();
            for p in entry_properties {
                properties.insert(
                    property_name(&entry.param.name, entry.slot, p.field, p.component),
                    p.value,
                );
            }
        }

        stats.log_drops(&resource.resource_type, &resource.resource_id);

        let (partition_key, row_key) = if resource.is_history {
            (
                format!("{}{}", resource.resource_type, self.history_suffix),
                format!(
                    "{}{}{}",
                    resource.resource_id, HISTORY_ROW_KEY_SEPARATOR, resource.version_id
                ),
            )
        } else {
            (resource.resource_type.clone(), resource.resource_id.clone())
        };

        Ok(TableProjection {
            entity: TableEntity {
                partition_key,
                row_key,
                timestamp: resource.last_modified,
                properties,
            },
            stats,
        })
    }
}
