//! Index projection engine.
//!
//! Turns the search values of one resource version into the storage shape of
//! a backend. All generators share [`IndexPolicy`]: composite expansion,
//! deduplication and the per-parameter combination cap.
//!
//! | Generator | Output |
//! |-----------|--------|
//! | [`DocumentIndexGenerator`] | JSON document with a `searchIndices` array |
//! | [`RelationalIndexGenerator`] | rows for the per-kind search parameter tables |
//! | [`TableIndexGenerator`] | one wide-column entity with flattened properties |

pub mod composite;
pub mod document;
pub mod policy;
pub mod pool;
pub mod relational;
pub mod table;

pub use document::{DocumentIndexGenerator, DocumentProjection};
pub use policy::{IndexPolicy, IndexProperty, ProjectedEntry, ProjectionStats};
pub use pool::{GeneratorPool, PooledGenerator};
pub use relational::{
    IdResolver, RelationalIndexGenerator, RowData, RowKind, SearchParamRow, StaticIdResolver,
};
pub use table::{TableEntity, TableIndexGenerator, TableProjection};

use crate::types::{ResourceWrapper, SearchIndexEntry};

/// A resource version together with its extracted index entries.
#[derive(Debug, Clone)]
pub struct IndexedResource {
    /// The resource version.
    pub resource: ResourceWrapper,
    /// Its search values.
    pub entries: Vec<SearchIndexEntry>,
}

impl IndexedResource {
    /// Pairs a resource with its entries.
    pub fn new(resource: ResourceWrapper, entries: Vec<SearchIndexEntry>) -> Self {
        Self { resource, entries }
    }
}
