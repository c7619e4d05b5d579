//! In-process wide-column table.
//!
//! Entities are kept ordered by `(PartitionKey, RowKey)` and scanned in that
//! order. Each request may only look at `scan_budget` entities, so a
//! selective filter can legitimately produce an empty page that still
//! carries a continuation.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::compiler::TableFilter;
use crate::config::SearchIndexConfig;
use crate::error::{IndexResult, SearchIndexResult};
use crate::index::{ProjectionStats, TableEntity, TableIndexGenerator};
use crate::search::{Projection, QueryPage, SearchClient};
use crate::types::{ResourceWrapper, SearchIndexEntry};

/// Cursor of a wide-column scan: the key of the next entity to examine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableContinuation {
    /// Partition key of the next entity.
    pub next_partition_key: String,
    /// Row key of the next entity.
    pub next_row_key: String,
}

type EntityKey = (String, String);

/// A wide-column table held in memory.
#[derive(Debug)]
pub struct MemoryTableClient {
    entities: RwLock<BTreeMap<EntityKey, TableEntity>>,
    generator: TableIndexGenerator,
    history_suffix: String,
    scan_budget: usize,
}

impl MemoryTableClient {
    /// Creates an empty table with an unlimited scan budget.
    pub fn new(config: &SearchIndexConfig) -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            generator: TableIndexGenerator::new(config),
            history_suffix: config.history_partition_suffix.clone(),
            scan_budget: usize::MAX,
        }
    }

    /// Limits how many entities a single request may examine.
    pub fn with_scan_budget(mut self, budget: usize) -> Self {
        self.scan_budget = budget.max(1);
        self
    }

    /// Inserts or replaces an entity.
    pub fn upsert(&self, entity: TableEntity) {
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        self.entities.write().insert(key, entity);
    }

    /// Projects a resource version and upserts its entity.
    pub fn index(
        &self,
        resource: &ResourceWrapper,
        entries: &[SearchIndexEntry],
    ) -> IndexResult<ProjectionStats> {
        let projection = self.generator.generate(resource, entries)?;
        self.upsert(projection.entity);
        Ok(projection.stats)
    }

    /// Returns an entity by key.
    pub fn get(&self, partition_key: &str, row_key: &str) -> Option<TableEntity> {
        self.entities
            .read()
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    fn resource_type<'a>(&self, partition_key: &'a str) -> &'a str {
        partition_key
            .strip_suffix(self.history_suffix.as_str())
            .unwrap_or(partition_key)
    }
}

#[async_trait]
impl SearchClient for MemoryTableClient {
    type Filter = TableFilter;
    type Cursor = TableContinuation;

    fn backend_name(&self) -> &'static str {
        "table"
    }

    async fn query(
        &self,
        filter: &TableFilter,
        max_items: usize,
        cursor: Option<TableContinuation>,
        projection: Projection,
    ) -> SearchIndexResult<QueryPage<TableContinuation>> {
        let entities = self.entities.read();
        let lower = match cursor {
            Some(c) => Bound::Included((c.next_partition_key, c.next_row_key)),
            None => Bound::Unbounded,
        };
        let mut scan = entities.range((lower, Bound::Unbounded)).peekable();

        let identity_only = projection == Projection::IdentityOnly;
        let mut rows = Vec::new();
        let mut scanned = 0usize;
        for (_, entity) in scan.by_ref() {
            scanned += 1;
            if filter.evaluate(entity) {
                let resource_type = self.resource_type(&entity.partition_key);
                rows.push(entity.to_resource(resource_type, identity_only));
            }
            if rows.len() >= max_items || scanned >= self.scan_budget {
                break;
            }
        }

        let next = scan.peek().map(|((pk, rk), _)| TableContinuation {
            next_partition_key: pk.clone(),
            next_row_key: rk.clone(),
        });
        trace!(scanned, matched = rows.len(), more = next.is_some(), "table scan");

        Ok(QueryPage::new(rows, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{ExpressionCompiler, TableCompiler};
    use crate::types::{Expression, FieldName, SearchParamType, SearchParameterInfo, SearchValue};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn resource(id: &str) -> ResourceWrapper {
        ResourceWrapper::new(
            "Patient",
            id,
            "1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            json!({"resourceType": "Patient", "id": id}),
        )
    }

    #[tokio::test]
    async fn test_scan_budget_yields_empty_pages() {
        let config = SearchIndexConfig::default();
        let client = MemoryTableClient::new(&config).with_scan_budget(2);
        let family = SearchParameterInfo::new("family", "", SearchParamType::String).shared();
        for i in 0..5 {
            let name = if i == 4 { "Smith" } else { "Jones" };
            client
                .index(
                    &resource(&format!("p{}", i)),
                    &[SearchIndexEntry::new(family.clone(), SearchValue::string(name))],
                )
                .unwrap();
        }

        let filter = TableCompiler::new(&config)
            .compile(
                "Patient",
                Some(&Expression::search_param(
                    family,
                    Expression::eq(FieldName::String, "Smith"),
                )),
                false,
            )
            .unwrap();

        let first = client.query(&filter, 10, None, Projection::Full).await.unwrap();
        assert!(first.rows.is_empty());
        assert_eq!(
            first.cursor,
            Some(TableContinuation {
                next_partition_key: "Patient".to_string(),
                next_row_key: "p2".to_string(),
            })
        );

        let second = client
            .query(&filter, 10, first.cursor, Projection::Full)
            .await
            .unwrap();
        assert!(second.rows.is_empty());

        let third = client
            .query(&filter, 10, second.cursor, Projection::IdentityOnly)
            .await
            .unwrap();
        assert_eq!(third.rows.len(), 1);
        assert_eq!(third.rows[0].resource_id, "p4");
        assert!(third.rows[0].raw_resource.is_null());
        assert!(third.cursor.is_none());
    }
}
