//! Core types of the search index.
//!
//! - [`SearchParameterInfo`], [`SearchParamType`] - parameter identity
//! - [`SearchValue`] and its variants - typed extracted values
//! - [`SearchIndexEntry`] - a value bound to its parameter
//! - [`Literal`], [`FieldName`] - native scalars and searchable sub-fields
//! - [`Expression`] - backend-agnostic search trees
//! - [`SearchOptions`], [`SearchResult`], [`ResourceWrapper`] - request/response
//! - [`ContinuationToken`] - opaque paging token
//!
//! # Examples
//!
//! ```
//! use helios_search_index::types::{
//!     Expression, FieldName, SearchIndexEntry, SearchParamType, SearchParameterInfo,
//!     SearchValue,
//! };
//!
//! let identifier = SearchParameterInfo::new(
//!     "identifier",
//!     "http://hl7.org/fhir/SearchParameter/Patient-identifier",
//!     SearchParamType::Token,
//! )
//! .shared();
//!
//! let entry = SearchIndexEntry::checked(
//!     identifier.clone(),
//!     SearchValue::token(Some("sys1"), "A"),
//! )
//! .unwrap();
//! assert_eq!(entry.name(), "identifier");
//!
//! let query = Expression::search_param(
//!     identifier,
//!     Expression::and(vec![
//!         Expression::eq(FieldName::TokenSystem, "sys1"),
//!         Expression::eq(FieldName::TokenCode, "A"),
//!     ]),
//! );
//! # let _ = query;
//! ```

mod entry;
mod expression;
mod literal;
mod options;
mod pagination;
mod search_params;
mod search_value;

pub use entry::SearchIndexEntry;
pub use expression::{BinaryOperator, Expression, MultiaryOperator, StringOperator};
pub use literal::{FieldName, Literal, format_timestamp};
pub use options::{ResourceWrapper, SearchOptions, SearchResult};
pub use pagination::ContinuationToken;
pub use search_params::{
    ID_PARAM, LAST_UPDATED_PARAM, RESOURCE_TYPE_PARAM, SearchParamType, SearchParameterInfo,
};
pub use search_value::{
    CompositeValue, DatePrecision, DateTimeRange, NumberRange, QuantityRange, ReferenceValue,
    SearchValue, StringValue, TICK_NANOS, TokenValue, UriValue, normalize_text,
};
