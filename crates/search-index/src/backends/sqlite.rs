//! SQLite relational client.
//!
//! Stores resource versions in a `resource` table and their search values in
//! one table per value kind, exactly as [`RelationalIndexGenerator`] shapes
//! them. Queries take the `WHERE` condition produced by
//! [`RelationalCompiler`](crate::compiler::RelationalCompiler) and page by
//! surrogate id.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Null, ToSqlOutput};
use rusqlite::{Connection, ToSql, params, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compiler::{SqlFragment, SqlParam};
use crate::error::{BackendError, SearchIndexResult};
use crate::index::{IdResolver, IndexedResource, RelationalIndexGenerator, RowKind};
use crate::search::{Projection, QueryPage, SearchClient};
use crate::types::{ResourceWrapper, format_timestamp};

const BACKEND: &str = "sqlite";

/// Configuration for the SQLite client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteClientConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteClientConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

/// Keyset cursor: the last surrogate id returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteCursor {
    /// Rows after this surrogate id come next.
    pub after_surrogate_id: i64,
}

/// Relational search client on SQLite.
pub struct SqliteSearchClient {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteClientConfig,
    is_memory: bool,
}

impl Debug for SqliteSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSearchClient")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

impl SqliteSearchClient {
    /// Creates a client over a private in-memory database.
    pub fn in_memory() -> SearchIndexResult<Self> {
        let config = SqliteClientConfig {
            // Every in-memory connection is a separate database.
            max_connections: 1,
            ..Default::default()
        };
        Self::build(SqliteConnectionManager::memory(), config, true)
    }

    /// Opens or creates a file database.
    pub fn open<P: AsRef<Path>>(path: P) -> SearchIndexResult<Self> {
        Self::with_config(path, SqliteClientConfig::default())
    }

    /// Opens a file database with custom configuration.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteClientConfig,
    ) -> SearchIndexResult<Self> {
        Self::build(SqliteConnectionManager::file(path.as_ref()), config, false)
    }

    fn build(
        manager: SqliteConnectionManager,
        config: SqliteClientConfig,
        is_memory: bool,
    ) -> SearchIndexResult<Self> {
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let manager = manager.with_init(move |conn| conn.busy_timeout(busy_timeout));
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)?;

        let client = Self {
            pool,
            config,
            is_memory,
        };
        client.init_schema()?;
        Ok(client)
    }

    /// Creates the resource and search parameter tables if absent.
    pub fn init_schema(&self) -> SearchIndexResult<()> {
        let conn = self.get_connection()?;
        if self.config.enable_wal && !self.is_memory {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        create_schema(&conn)?;
        info!(tables = RowKind::ALL.len() + 1, "SQLite search schema ready");
        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &SqliteClientConfig {
        &self.config
    }

    fn get_connection(&self) -> SearchIndexResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Writes a batch of resource versions and their search rows.
    ///
    /// Writing a live version moves any previous live version of the same
    /// resource into history. Search rows are streamed from the generator
    /// and attached to the surrogate ids assigned here. Returns the number
    /// of search rows written.
    pub fn write_batch<R: IdResolver>(
        &self,
        generator: &RelationalIndexGenerator<R>,
        batch: &[IndexedResource],
    ) -> SearchIndexResult<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let mut surrogate_ids = Vec::with_capacity(batch.len());
        for item in batch {
            let resource = &item.resource;
            let type_id = generator.resolver().resource_type_id(&resource.resource_type)?;
            if !resource.is_history {
                tx.execute(
                    "UPDATE resource SET is_history = 1 WHERE resource_type_id = ?1 AND resource_id = ?2 AND is_history = 0",
                    params![type_id, resource.resource_id],
                )?;
            }
            tx.execute(
                "INSERT INTO resource (resource_type_id, resource_type, resource_id, version, is_history, last_updated, raw_resource)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    type_id,
                    resource.resource_type,
                    resource.resource_id,
                    resource.version_id,
                    resource.is_history,
                    format_timestamp(&resource.last_modified),
                    resource.raw_resource.to_string(),
                ],
            )?;
            surrogate_ids.push(tx.last_insert_rowid());
        }

        let mut written = 0usize;
        for row in generator.generate_batch(batch) {
            let row = row?;
            let kind = row.kind();
            let columns = kind.value_columns();
            let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
            let placeholders = vec!["?"; 5 + columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} (resource_surrogate_id, resource_type_id, search_param_id, component_index, composite_instance_id, {}) VALUES ({})",
                kind.table_name(),
                names.join(", "),
                placeholders
            );

            let mut values = vec![
                SqlParam::Integer(surrogate_ids[row.offset]),
                SqlParam::Integer(i64::from(row.resource_type_id)),
                SqlParam::Integer(i64::from(row.search_param_id)),
                row.component_index
                    .map_or(SqlParam::Null, |i| SqlParam::Integer(i as i64)),
                row.composite_instance_id
                    .map_or(SqlParam::Null, |i| SqlParam::Integer(i64::from(i))),
            ];
            values.extend(
                row.data
                    .values()
                    .iter()
                    .map(|v| v.as_ref().map_or(SqlParam::Null, SqlParam::from_literal)),
            );

            tx.prepare_cached(&sql)?.execute(params_from_iter(values.iter()))?;
            written += 1;
        }

        tx.commit()?;
        debug!(resources = batch.len(), rows = written, "wrote search index batch");
        Ok(written)
    }
}

fn create_schema(conn: &Connection) -> SearchIndexResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS resource (
            resource_surrogate_id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_type_id INTEGER NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            version TEXT NOT NULL,
            is_history INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL,
            raw_resource TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_resource_type_id
            ON resource(resource_type_id, resource_id, is_history);",
    )?;

    for kind in RowKind::ALL {
        let columns: Vec<String> = kind
            .value_columns()
            .iter()
            .map(|(name, sql_type)| format!("{} {}", name, sql_type))
            .collect();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                resource_surrogate_id INTEGER NOT NULL REFERENCES resource(resource_surrogate_id),
                resource_type_id INTEGER NOT NULL,
                search_param_id INTEGER NOT NULL,
                component_index INTEGER,
                composite_instance_id INTEGER,
                {columns}
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_param
                ON {table}(search_param_id, resource_surrogate_id);",
            table = kind.table_name(),
            columns = columns.join(",\n                "),
        ))?;
    }
    Ok(())
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::String(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Float(f) => ToSqlOutput::from(*f),
            SqlParam::Null => ToSqlOutput::from(Null),
        })
    }
}

/// Raw columns of one result row.
type ResourceRow = (i64, String, String, String, bool, String, Option<String>);

fn to_resource(row: ResourceRow) -> SearchIndexResult<ResourceWrapper> {
    let (_, resource_type, resource_id, version_id, is_history, last_updated, raw) = row;
    let last_modified = DateTime::parse_from_rfc3339(&last_updated)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BackendError::SerializationError {
            message: format!("invalid last_updated '{}': {}", last_updated, e),
        })?;
    let raw_resource = match raw {
        Some(text) => serde_json::from_str(&text)?,
        None => serde_json::Value::Null,
    };
    Ok(ResourceWrapper {
        resource_type,
        resource_id,
        version_id,
        last_modified,
        is_history,
        raw_resource,
    })
}

#[async_trait]
impl SearchClient for SqliteSearchClient {
    type Filter = SqlFragment;
    type Cursor = SqliteCursor;

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn query(
        &self,
        filter: &SqlFragment,
        max_items: usize,
        cursor: Option<SqliteCursor>,
        projection: Projection,
    ) -> SearchIndexResult<QueryPage<SqliteCursor>> {
        let raw_column = match projection {
            Projection::Full => "r.raw_resource",
            Projection::IdentityOnly => "NULL",
        };
        let sql = format!(
            "SELECT r.resource_surrogate_id, r.resource_type, r.resource_id, r.version, r.is_history, r.last_updated, {} \
             FROM resource r WHERE {} AND r.resource_surrogate_id > ? \
             ORDER BY r.resource_surrogate_id LIMIT ?",
            raw_column, filter.sql
        );

        let mut bound = filter.params.clone();
        bound.push(SqlParam::Integer(cursor.map_or(0, |c| c.after_surrogate_id)));
        // One extra row tells whether another page exists.
        bound.push(SqlParam::Integer(max_items as i64 + 1));

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows: Vec<ResourceRow> = stmt
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let next = if rows.len() > max_items {
            rows.truncate(max_items);
            rows.last().map(|row| SqliteCursor {
                after_surrogate_id: row.0,
            })
        } else {
            None
        };

        let resources = rows
            .into_iter()
            .map(to_resource)
            .collect::<SearchIndexResult<Vec<_>>>()?;
        Ok(QueryPage::new(resources, next))
    }
}
