//! Helios FHIR Server Search Index
//!
//! This crate turns the extracted search values of FHIR resources into index
//! entries for three storage shapes, and compiles parsed search expressions
//! into the native filter of each shape.
//!
//! # Features
//!
//! - **Index projection**: document (embedded `searchIndices` array),
//!   relational (one table per value kind) and wide-column (flattened
//!   properties with per-parameter slots)
//! - **Composite expansion**: composite parameters are expanded into the
//!   Cartesian product of their component values, deduplicated and capped
//! - **Query compilation**: one compiler per backend over a closed
//!   expression tree, with unsupported constructs reported as errors
//! - **Paging**: opaque continuation tokens, count-only searches, and a
//!   pager that skips empty pages returned under scan budgets
//!
//! Enable the SQLite reference client with the `sqlite` feature (default):
//!
//! ```toml
//! [dependencies]
//! helios-search-index = { version = "0.1", features = ["sqlite"] }
//! ```
//!
//! # Architecture
//!
//! - [`types`] - Search values, parameters, expressions and search options
//! - [`index`] - Projection engine and the three index generators
//! - [`compiler`] - Expression compilers, one per backend
//! - [`search`] - Search client trait and the search executor
//! - [`backends`] - Reference clients (in-memory wide-column table, SQLite)
//! - [`config`] - Tunables and validation
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use helios_search_index::compiler::{ExpressionCompiler, TableCompiler};
//! use helios_search_index::config::SearchIndexConfig;
//! use helios_search_index::index::TableIndexGenerator;
//! use helios_search_index::types::{
//!     Expression, FieldName, ResourceWrapper, SearchIndexEntry, SearchParamType,
//!     SearchParameterInfo, SearchValue,
//! };
//! use chrono::Utc;
//! use serde_json::json;
//!
//! let config = SearchIndexConfig::default();
//! let identifier = SearchParameterInfo::new(
//!     "identifier",
//!     "http://hl7.org/fhir/SearchParameter/Patient-identifier",
//!     SearchParamType::Token,
//! )
//! .shared();
//!
//! // Project a resource with two identifiers
//! let patient = ResourceWrapper::new("Patient", "p1", "1", Utc::now(), json!({"id": "p1"}));
//! let entries = vec![
//!     SearchIndexEntry::new(identifier.clone(), SearchValue::token(Some("sys1"), "A")),
//!     SearchIndexEntry::new(identifier.clone(), SearchValue::token(Some("sys2"), "B")),
//! ];
//! let projection = TableIndexGenerator::new(&config).generate(&patient, &entries).unwrap();
//!
//! // Compile `identifier=sys2|B` and evaluate it against the entity
//! let expr = Expression::search_param(
//!     identifier,
//!     Expression::and(vec![
//!         Expression::eq(FieldName::TokenSystem, "sys2"),
//!         Expression::eq(FieldName::TokenCode, "B"),
//!     ]),
//! );
//! let filter = TableCompiler::new(&config).compile("Patient", Some(&expr), false).unwrap();
//! assert!(filter.evaluate(&projection.entity));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod compiler;
pub mod config;
pub mod error;
pub mod index;
pub mod search;
pub mod types;

// Re-export commonly used types at crate root
pub use config::SearchIndexConfig;
pub use error::{SearchIndexError, SearchIndexResult};
pub use types::{ContinuationToken, Expression, SearchOptions, SearchResult};

// Re-export core traits
pub use compiler::ExpressionCompiler;
pub use index::IdResolver;
pub use search::{SearchClient, SearchExecutor};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
