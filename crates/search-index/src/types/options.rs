//! Search requests, responses and the resource envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ContinuationToken, Expression};

/// Persisted metadata of one resource version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWrapper {
    /// The resource type (e.g., "Patient").
    pub resource_type: String,

    /// The logical id.
    pub resource_id: String,

    /// The version id.
    pub version_id: String,

    /// When this version was written.
    pub last_modified: DateTime<Utc>,

    /// True for superseded versions.
    pub is_history: bool,

    /// The resource JSON; `Null` when only identity was projected.
    #[serde(default)]
    pub raw_resource: Value,
}

impl ResourceWrapper {
    /// Creates a live (non-history) resource version.
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        version_id: impl Into<String>,
        last_modified: DateTime<Utc>,
        raw_resource: Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            version_id: version_id.into(),
            last_modified,
            is_history: false,
            raw_resource,
        }
    }

    /// Marks this version as superseded.
    pub fn into_history(mut self) -> Self {
        self.is_history = true;
        self
    }

    /// Returns the `Type/id` reference for this resource.
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

/// A search request.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// The resource type to search.
    pub resource_type: String,

    /// The filter; `None` matches every resource of the type.
    pub expression: Option<Expression>,

    /// Page size; falls back to the configured default.
    pub max_item_count: Option<usize>,

    /// Token returned by the previous page.
    pub continuation_token: Option<ContinuationToken>,

    /// Return only the number of matches.
    pub count_only: bool,

    /// Also compute the total number of matches.
    pub include_total: bool,

    /// Parameters the parser could not interpret, echoed back to the caller.
    pub unsupported_search_params: Vec<(String, String)>,
}

impl SearchOptions {
    /// Creates options for an unfiltered search of `resource_type`.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Sets the filter expression.
    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Sets the page size.
    pub fn with_max_item_count(mut self, count: usize) -> Self {
        self.max_item_count = Some(count);
        self
    }

    /// Sets the continuation token.
    pub fn with_continuation_token(mut self, token: Option<ContinuationToken>) -> Self {
        self.continuation_token = token;
        self
    }

    /// Requests only the match count.
    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    /// Requests the total alongside the page.
    pub fn with_total(mut self) -> Self {
        self.include_total = true;
        self
    }
}

/// A page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// The matched resources.
    pub entries: Vec<ResourceWrapper>,

    /// Parameters that were ignored.
    pub unsupported_search_params: Vec<(String, String)>,

    /// Token for the next page, absent on the last page.
    pub continuation_token: Option<ContinuationToken>,

    /// Total number of matches, when requested.
    pub total_count: Option<u64>,
}

impl SearchResult {
    /// Returns true if another page is available.
    pub fn has_more(&self) -> bool {
        self.continuation_token.is_some()
    }
}
