//! Configuration for indexing and search.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables shared by the projection engine, the compilers and the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexConfig {
    /// Slots per search parameter per resource. Values past this cap are
    /// dropped from the index.
    #[serde(default = "default_max_index_combinations_per_type")]
    pub max_index_combinations_per_type: usize,

    /// Property ceiling of a single wide-column entity.
    #[serde(default = "default_table_max_entity_properties")]
    pub table_max_entity_properties: usize,

    /// Properties every wide-column entity spends on keys and metadata.
    #[serde(default = "default_table_reserved_properties")]
    pub table_reserved_properties: usize,

    /// Number of document index generators kept in the pool.
    #[serde(default = "default_document_pool_size")]
    pub document_pool_size: usize,

    /// Page size used when a request does not specify one.
    #[serde(default = "default_max_item_count")]
    pub default_max_item_count: usize,

    /// Upper bound on any requested page size.
    #[serde(default = "default_max_item_count_limit")]
    pub max_item_count_limit: usize,

    /// Suffix appended to a resource type to name its history partition.
    #[serde(default = "default_history_partition_suffix")]
    pub history_partition_suffix: String,
}

fn default_max_index_combinations_per_type() -> usize {
    10
}

fn default_table_max_entity_properties() -> usize {
    252
}

fn default_table_reserved_properties() -> usize {
    8
}

fn default_document_pool_size() -> usize {
    16
}

fn default_max_item_count() -> usize {
    20
}

fn default_max_item_count_limit() -> usize {
    1000
}

fn default_history_partition_suffix() -> String {
    "_history".to_string()
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            max_index_combinations_per_type: default_max_index_combinations_per_type(),
            table_max_entity_properties: default_table_max_entity_properties(),
            table_reserved_properties: default_table_reserved_properties(),
            document_pool_size: default_document_pool_size(),
            default_max_item_count: default_max_item_count(),
            max_item_count_limit: default_max_item_count_limit(),
            history_partition_suffix: default_history_partition_suffix(),
        }
    }
}

impl SearchIndexConfig {
    /// Sets the per-parameter combination cap.
    pub fn with_combination_cap(mut self, cap: usize) -> Self {
        self.max_index_combinations_per_type = cap;
        self
    }

    /// Number of index properties available on one wide-column entity.
    pub fn table_property_budget(&self) -> usize {
        self.table_max_entity_properties
            .saturating_sub(self.table_reserved_properties)
    }

    /// Name of the history partition for `resource_type`.
    pub fn history_partition(&self, resource_type: &str) -> String {
        format!("{}{}", resource_type, self.history_partition_suffix)
    }

    /// Resolves a requested page size against the default and the limit.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_max_item_count)
            .clamp(1, self.max_item_count_limit)
    }

    /// Validates the configuration and returns any warnings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        if self.max_index_combinations_per_type == 0 {
            return Err(ConfigError::ZeroValue(
                "max_index_combinations_per_type".to_string(),
            ));
        }
        if self.document_pool_size == 0 {
            return Err(ConfigError::ZeroValue("document_pool_size".to_string()));
        }
        if self.max_item_count_limit == 0 {
            return Err(ConfigError::ZeroValue("max_item_count_limit".to_string()));
        }
        if self.table_reserved_properties >= self.table_max_entity_properties {
            return Err(ConfigError::NoPropertyBudget {
                reserved: self.table_reserved_properties,
                max: self.table_max_entity_properties,
            });
        }
        if self.history_partition_suffix.is_empty() {
            return Err(ConfigError::EmptyHistorySuffix);
        }

        if self.default_max_item_count > self.max_item_count_limit {
            warnings.push(ConfigWarning::DefaultPageSizeClamped {
                default: self.default_max_item_count,
                limit: self.max_item_count_limit,
            });
        }

        Ok(warnings)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A count that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroValue(String),

    /// Reserved properties leave no room for index properties.
    #[error("table_reserved_properties ({reserved}) must be below table_max_entity_properties ({max})")]
    NoPropertyBudget {
        /// Reserved property count.
        reserved: usize,
        /// Entity property ceiling.
        max: usize,
    },

    /// History partitions would collide with live partitions.
    #[error("history_partition_suffix must not be empty")]
    EmptyHistorySuffix,
}

/// Non-fatal configuration findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The default page size exceeds the limit and will be clamped.
    DefaultPageSizeClamped {
        /// Configured default.
        default: usize,
        /// Configured limit.
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = SearchIndexConfig::default();
        assert_eq!(config.max_index_combinations_per_type, 10);
        assert_eq!(config.table_property_budget(), 244);
        assert_eq!(config.history_partition("Patient"), "Patient_history");
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: SearchIndexConfig =
            serde_json::from_value(json!({ "max_index_combinations_per_type": 3 })).unwrap();
        assert_eq!(config.max_index_combinations_per_type, 3);
        assert_eq!(config.default_max_item_count, 20);
        assert_eq!(config.history_partition_suffix, "_history");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SearchIndexConfig::default().with_combination_cap(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroValue(_))));

        let config = SearchIndexConfig {
            table_reserved_properties: 252,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoPropertyBudget { .. })
        ));

        let config = SearchIndexConfig {
            history_partition_suffix: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyHistorySuffix));
    }

    #[test]
    fn test_page_size_clamping() {
        let config = SearchIndexConfig {
            default_max_item_count: 2000,
            ..Default::default()
        };
        assert_eq!(config.page_size(None), 1000);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(50)), 50);
        assert_eq!(config.validate().unwrap().len(), 1);
    }
}
