//! Search executor and pager.

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::compiler::ExpressionCompiler;
use crate::config::SearchIndexConfig;
use crate::error::{SearchError, SearchIndexResult};
use crate::types::{ContinuationToken, SearchOptions, SearchResult};

use super::client::{Projection, QueryPage, SearchClient};

/// Compiles searches and pages through a backend.
pub struct SearchExecutor<C, S> {
    compiler: C,
    client: S,
    config: SearchIndexConfig,
    cancellation: CancellationToken,
}

impl<C, S> SearchExecutor<C, S>
where
    C: ExpressionCompiler,
    S: SearchClient<Filter = C::Filter>,
{
    /// Creates an executor.
    pub fn new(compiler: C, client: S, config: SearchIndexConfig) -> Self {
        Self {
            compiler,
            client,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The token that cancels in-flight searches.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The compiler.
    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// The backend client.
    pub fn client(&self) -> &S {
        &self.client
    }

    /// Searches current versions.
    pub async fn search(&self, options: &SearchOptions) -> SearchIndexResult<SearchResult> {
        self.run(options, false).await
    }

    /// Searches current and superseded versions.
    pub async fn search_history(&self, options: &SearchOptions) -> SearchIndexResult<SearchResult> {
        self.run(options, true).await
    }

    /// Counts current versions matching `options`.
    pub async fn count_only(&self, options: &SearchOptions) -> SearchIndexResult<u64> {
        let filter =
            self.compiler
                .compile(&options.resource_type, options.expression.as_ref(), false)?;
        self.count(&filter).await
    }

    #[instrument(skip(self, options), fields(resource_type = %options.resource_type))]
    async fn run(&self, options: &SearchOptions, history: bool) -> SearchIndexResult<SearchResult> {
        let filter =
            self.compiler
                .compile(&options.resource_type, options.expression.as_ref(), history)?;

        if options.count_only {
            let total = self.count(&filter).await?;
            return Ok(SearchResult {
                entries: Vec::new(),
                unsupported_search_params: options.unsupported_search_params.clone(),
                continuation_token: None,
                total_count: Some(total),
            });
        }

        let page_size = self.config.page_size(options.max_item_count);
        let cursor = options
            .continuation_token
            .as_ref()
            .map(|token| token.decode::<S::Cursor>())
            .transpose()?;

        let (page, total_count) = if options.include_total {
            let (page, total) = tokio::join!(
                self.fetch_page(&filter, page_size, cursor),
                self.count(&filter)
            );
            (page?, Some(total?))
        } else {
            (self.fetch_page(&filter, page_size, cursor).await?, None)
        };

        let continuation_token = page
            .cursor
            .as_ref()
            .map(ContinuationToken::encode)
            .transpose()?;

        Ok(SearchResult {
            entries: page.rows,
            unsupported_search_params: options.unsupported_search_params.clone(),
            continuation_token,
            total_count,
        })
    }

    /// Fetches one page, skipping empty pages that still carry a cursor.
    async fn fetch_page(
        &self,
        filter: &C::Filter,
        page_size: usize,
        mut cursor: Option<S::Cursor>,
    ) -> SearchIndexResult<QueryPage<S::Cursor>> {
        let mut iterations = 0usize;
        loop {
            self.check_cancelled()?;
            let page = self
                .client
                .query(filter, page_size, cursor, Projection::Full)
                .await?;
            iterations += 1;

            if !page.rows.is_empty() || page.cursor.is_none() {
                return Ok(page);
            }
            debug!(
                backend = self.client.backend_name(),
                iterations, "empty page with continuation, re-issuing query"
            );
            cursor = page.cursor;
        }
    }

    /// Counts matches by paging identity-only projections to the end.
    async fn count(&self, filter: &C::Filter) -> SearchIndexResult<u64> {
        let mut total = 0u64;
        let mut cursor = None;
        loop {
            self.check_cancelled()?;
            let page = self
                .client
                .query(
                    filter,
                    self.config.max_item_count_limit,
                    cursor,
                    Projection::IdentityOnly,
                )
                .await?;
            total += page.rows.len() as u64;
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(total),
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), SearchError> {
        if self.cancellation.is_cancelled() {
            Err(SearchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchIndexError;
    use crate::types::{Expression, ResourceWrapper};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Compiles nothing; the filter is the resource type.
    struct TypeCompiler;

    impl ExpressionCompiler for TypeCompiler {
        type Filter = String;

        fn backend_name(&self) -> &'static str {
            "fake"
        }

        fn compile(
            &self,
            resource_type: &str,
            expression: Option<&Expression>,
            _history: bool,
        ) -> Result<String, SearchError> {
            match expression {
                Some(Expression::Include { .. }) => {
                    Err(SearchError::not_supported("include", "fake"))
                }
                _ => Ok(resource_type.to_string()),
            }
        }
    }

    /// Serves `total` rows, returning `empty_before` empty pages first.
    struct FakeClient {
        total: usize,
        empty_before: usize,
        calls: Mutex<usize>,
    }

    impl FakeClient {
        fn new(total: usize, empty_before: usize) -> Self {
            Self {
                total,
                empty_before,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SearchClient for FakeClient {
        type Filter = String;
        type Cursor = usize;

        fn backend_name(&self) -> &'static str {
            "fake"
        }

        async fn query(
            &self,
            filter: &String,
            max_items: usize,
            cursor: Option<usize>,
            _projection: Projection,
        ) -> SearchIndexResult<QueryPage<usize>> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            let start = cursor.unwrap_or(0);
            if call <= self.empty_before {
                return Ok(QueryPage::new(Vec::new(), Some(start)));
            }
            let end = (start + max_items).min(self.total);
            let rows = (start..end)
                .map(|i| {
                    ResourceWrapper::new(
                        filter.as_str(),
                        format!("r{}", i),
                        "1",
                        Utc::now(),
                        json!({}),
                    )
                })
                .collect();
            Ok(QueryPage::new(rows, (end < self.total).then_some(end)))
        }
    }

    fn executor(client: FakeClient) -> SearchExecutor<TypeCompiler, FakeClient> {
        SearchExecutor::new(TypeCompiler, client, SearchIndexConfig::default())
    }

    #[tokio::test]
    async fn test_pages_follow_continuation() {
        let executor = executor(FakeClient::new(5, 0));
        let options = SearchOptions::new("Patient").with_max_item_count(3);

        let first = executor.search(&options).await.unwrap();
        assert_eq!(first.entries.len(), 3);
        assert!(first.has_more());

        let second = executor
            .search(&options.clone().with_continuation_token(first.continuation_token))
            .await
            .unwrap();
        let ids: Vec<_> = second.entries.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r4"]);
        assert!(!second.has_more());
    }

    #[tokio::test]
    async fn test_empty_pages_are_skipped() {
        let executor = executor(FakeClient::new(2, 3));
        let result = executor.search(&SearchOptions::new("Patient")).await.unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(*executor.client().calls.lock(), 4);
    }

    #[tokio::test]
    async fn test_count_and_total() {
        let executor = executor(FakeClient::new(2500, 0));
        assert_eq!(executor.count_only(&SearchOptions::new("Patient")).await.unwrap(), 2500);

        let result = executor
            .search(&SearchOptions::new("Patient").count_only())
            .await
            .unwrap();
        assert!(result.entries.is_empty());
        assert_eq!(result.total_count, Some(2500));

        let with_total = executor
            .search(&SearchOptions::new("Patient").with_total())
            .await
            .unwrap();
        assert_eq!(with_total.entries.len(), 20);
        assert_eq!(with_total.total_count, Some(2500));
    }

    #[tokio::test]
    async fn test_cancelled_before_backend_call() {
        let executor = executor(FakeClient::new(5, 0));
        executor.cancellation_token().cancel();
        let err = executor.search(&SearchOptions::new("Patient")).await.unwrap_err();
        assert!(matches!(err, SearchIndexError::Search(SearchError::Cancelled)));
        assert_eq!(*executor.client().calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_invalid_token_and_unsupported() {
        let executor = executor(FakeClient::new(5, 0));
        let options = SearchOptions::new("Patient")
            .with_continuation_token(Some(ContinuationToken::from_string("%%%")));
        let err = executor.search(&options).await.unwrap_err();
        assert!(matches!(
            err,
            SearchIndexError::Search(SearchError::InvalidContinuationToken { .. })
        ));

        let include = Expression::Include {
            param: crate::types::SearchParameterInfo::new(
                "subject",
                "",
                crate::types::SearchParamType::Reference,
            )
            .shared(),
            target_resource_type: None,
            reversed: false,
            iterate: false,
        };
        let err = executor
            .search(&SearchOptions::new("Observation").with_expression(include))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchIndexError::Search(e) if e.is_not_supported()));
    }
}
