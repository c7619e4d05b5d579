//! Backend query client trait.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::SearchIndexResult;
use crate::types::ResourceWrapper;

/// Which parts of each matching resource a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// The whole envelope including the raw resource.
    Full,
    /// Identity fields only; used for counting.
    IdentityOnly,
}

/// One page returned by a backend.
#[derive(Debug, Clone)]
pub struct QueryPage<C> {
    /// Matching resources, possibly none.
    pub rows: Vec<ResourceWrapper>,
    /// Cursor for the next page; `None` when the scan is complete.
    pub cursor: Option<C>,
}

impl<C> QueryPage<C> {
    /// Creates a page.
    pub fn new(rows: Vec<ResourceWrapper>, cursor: Option<C>) -> Self {
        Self { rows, cursor }
    }
}

/// Executes compiled filters against one storage backend.
///
/// A backend may return an empty page together with a cursor when it ran
/// out of scan budget before finding a match; the executor keeps
/// re-issuing in that case.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// The compiled filter this client accepts.
    type Filter: Clone + Debug + Send + Sync;

    /// The backend's native paging cursor.
    type Cursor: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;

    /// Backend name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Runs `filter`, returning at most `max_items` rows after `cursor`.
    async fn query(
        &self,
        filter: &Self::Filter,
        max_items: usize,
        cursor: Option<Self::Cursor>,
        projection: Projection,
    ) -> SearchIndexResult<QueryPage<Self::Cursor>>;
}
