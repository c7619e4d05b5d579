//! Error types for the search index core.
//!
//! Errors are layered the same way the rest of the server layers them: a
//! category enum per concern (indexing, search compilation/execution, backend
//! I/O) and one umbrella [`SearchIndexError`] that callers can match on.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

pub use crate::config::ConfigError;
use crate::types::SearchParamType;

/// The umbrella error type for every public operation of this crate.
#[derive(Error, Debug)]
pub enum SearchIndexError {
    /// Index generation errors
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Search compilation and execution errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while turning search values into index entries.
///
/// Oversized input is never an error; entries past the combination cap are
/// dropped by policy. These variants describe values that cannot be
/// interpreted at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// A value's variant does not match the parameter's declared kind.
    #[error("parameter '{param_name}' expects a {expected} value, found {actual}")]
    TypeMismatch {
        param_name: String,
        expected: SearchParamType,
        actual: SearchParamType,
    },

    /// A composite value contained another composite value.
    #[error("composite values cannot nest composite components")]
    NestedComposite,

    /// A composite value was built without any components.
    #[error("composite value has no components")]
    EmptyComposite,

    /// The resource type has no relational id.
    #[error("unknown resource type: {resource_type}")]
    UnknownResourceType { resource_type: String },

    /// The search parameter has no relational id.
    #[error("unknown search parameter: {url}")]
    UnknownSearchParameter { url: String },

    /// Every relational id of a registry is already assigned.
    #[error("no {registry} ids left to assign")]
    IdSpaceExhausted { registry: String },

    /// A partial date could not be parsed into a range.
    #[error("invalid date '{value}': {message}")]
    InvalidDate { value: String, message: String },
}

/// Errors raised while compiling or executing a search.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    /// The backend cannot express this search operation.
    #[error("search operation not supported by {backend}: {operation}")]
    NotSupported { operation: String, backend: String },

    /// The continuation token could not be decoded.
    #[error("invalid continuation token: {token}")]
    InvalidContinuationToken { token: String },

    /// The expression tree is structurally invalid for compilation.
    #[error("invalid search expression: {message}")]
    InvalidExpression { message: String },

    /// The caller cancelled the search between backend calls.
    #[error("search cancelled")]
    Cancelled,
}

/// Errors originating from a storage client.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Query execution error.
    #[error("query execution failed on {backend_name}: {message}")]
    QueryError {
        backend_name: String,
        message: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for index generation.
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for expression compilation.
pub type CompileResult<T> = Result<T, SearchError>;

/// Result type alias for all public operations.
pub type SearchIndexResult<T> = Result<T, SearchIndexError>;

impl SearchError {
    /// Creates a [`SearchError::NotSupported`] for the given backend.
    pub fn not_supported(operation: impl Into<String>, backend: impl ToString) -> Self {
        SearchError::NotSupported {
            operation: operation.into(),
            backend: backend.to_string(),
        }
    }

    /// Returns true if this error reports an unsupported operation.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, SearchError::NotSupported { .. })
    }
}

impl From<serde_json::Error> for SearchIndexError {
    fn from(err: serde_json::Error) -> Self {
        SearchIndexError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SearchIndexError {
    fn from(err: rusqlite::Error) -> Self {
        SearchIndexError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for SearchIndexError {
    fn from(err: r2d2::Error) -> Self {
        SearchIndexError::Backend(BackendError::Unavailable {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display() {
        let err = IndexError::TypeMismatch {
            param_name: "identifier".to_string(),
            expected: SearchParamType::Token,
            actual: SearchParamType::String,
        };
        assert_eq!(
            err.to_string(),
            "parameter 'identifier' expects a token value, found string"
        );
    }

    #[test]
    fn test_not_supported_display() {
        let err = SearchError::not_supported("chained search", "table");
        assert!(err.is_not_supported());
        assert_eq!(
            err.to_string(),
            "search operation not supported by table: chained search"
        );
    }

    #[test]
    fn test_umbrella_from_conversions() {
        let err: SearchIndexError = SearchError::Cancelled.into();
        assert!(matches!(err, SearchIndexError::Search(SearchError::Cancelled)));

        let err: SearchIndexError = IndexError::NestedComposite.into();
        assert!(matches!(err, SearchIndexError::Index(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SearchIndexError = json_err.into();
        assert!(matches!(
            err,
            SearchIndexError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
