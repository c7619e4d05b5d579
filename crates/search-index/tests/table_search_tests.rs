//! Wide-column search integration tests.
//!
//! These tests run compiled filters through the search executor against the
//! in-process wide-column table.

mod common;

use std::collections::HashSet;

use rust_decimal::Decimal;

use helios_search_index::backends::MemoryTableClient;
use helios_search_index::compiler::TableCompiler;
use helios_search_index::config::SearchIndexConfig;
use helios_search_index::error::{SearchError, SearchIndexError};
use helios_search_index::index::IndexedResource;
use helios_search_index::search::SearchExecutor;
use helios_search_index::types::{
    BinaryOperator, Expression, FieldName, SearchOptions, StringOperator,
};

use common::*;

type TableExecutor = SearchExecutor<TableCompiler, MemoryTableClient>;

fn create_executor(
    config: SearchIndexConfig,
    scan_budget: usize,
    items: &[IndexedResource],
) -> TableExecutor {
    let client = MemoryTableClient::new(&config).with_scan_budget(scan_budget);
    for item in items {
        client
            .index(&item.resource, &item.entries)
            .expect("Failed to index resource");
    }
    SearchExecutor::new(TableCompiler::new(&config), client, config)
}

fn family_is(name: &str) -> Expression {
    Expression::search_param(family(), Expression::eq(FieldName::String, name))
}

fn identifier_is(system: &str, code: &str) -> Expression {
    Expression::search_param(
        identifier(),
        Expression::and(vec![
            Expression::eq(FieldName::TokenSystem, system),
            Expression::eq(FieldName::TokenCode, code),
        ]),
    )
}

// ============================================================================
// Matching
// ============================================================================

#[tokio::test]
async fn test_identifier_scenario() {
    let executor = create_executor(
        SearchIndexConfig::default(),
        usize::MAX,
        &[
            patient("p1", "Smith", &[("sys1", "A"), ("sys2", "B")]),
            patient("p2", "Jones", &[("sys3", "Y")]),
        ],
    );

    let found = executor
        .search(&SearchOptions::new("Patient").with_expression(identifier_is("sys1", "A")))
        .await
        .unwrap();
    assert_eq!(found.entries.len(), 1);
    assert_eq!(found.entries[0].resource_id, "p1");

    let none = executor
        .search(&SearchOptions::new("Patient").with_expression(identifier_is("sys3", "Z")))
        .await
        .unwrap();
    assert!(none.entries.is_empty());
}

#[tokio::test]
async fn test_match_is_independent_of_slot() {
    let executor = create_executor(
        SearchIndexConfig::default(),
        usize::MAX,
        &[
            patient("p1", "Smith", &[("sys", "late")]),
            patient("p2", "Jones", &[("sys", "a"), ("sys", "b"), ("sys", "late")]),
        ],
    );

    let result = executor
        .search(&SearchOptions::new("Patient").with_expression(identifier_is("sys", "late")))
        .await
        .unwrap();
    let ids: Vec<_> = result.entries.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_case_insensitive_prefix() {
    let executor = create_executor(
        SearchIndexConfig::default(),
        usize::MAX,
        &[patient("p1", "Smith", &[]), patient("p2", "Smythe", &[]), patient("p3", "Jones", &[])],
    );

    let expr = Expression::search_param(
        family(),
        Expression::string_match(FieldName::String, StringOperator::StartsWith, "SM", true),
    );
    let result = executor
        .search(&SearchOptions::new("Patient").with_expression(expr))
        .await
        .unwrap();
    assert_eq!(result.entries.len(), 2);
}

#[tokio::test]
async fn test_missing_parameter() {
    let executor = create_executor(
        SearchIndexConfig::default(),
        usize::MAX,
        &[patient("p1", "Smith", &[("sys", "1")]), patient("p2", "Jones", &[])],
    );

    let expr =
        Expression::search_param(identifier(), Expression::missing(FieldName::TokenCode, true));
    let result = executor
        .search(&SearchOptions::new("Patient").with_expression(expr))
        .await
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].resource_id, "p2");
}

#[tokio::test]
async fn test_composite_components_correlate() {
    let executor = create_executor(
        SearchIndexConfig::default(),
        usize::MAX,
        &[observation("o1", "Patient/p1", &[("A", 120), ("B", 80)])],
    );

    let code_value = |code: &str, value: i64| {
        let expr = Expression::search_param(
            code_value_quantity(),
            Expression::and(vec![
                Expression::eq(FieldName::TokenCode, code).for_component(0),
                Expression::binary(
                    FieldName::QuantityLow,
                    BinaryOperator::Equal,
                    Decimal::from(value),
                )
                .for_component(1),
            ]),
        );
        SearchOptions::new("Observation").with_expression(expr)
    };

    let same_tuple = executor.search(&code_value("A", 120)).await.unwrap();
    assert_eq!(same_tuple.entries.len(), 1);
    assert_eq!(same_tuple.entries[0].resource_id, "o1");

    let crossed = executor.search(&code_value("A", 80)).await.unwrap();
    assert!(crossed.entries.is_empty());
}

#[tokio::test]
async fn test_component_missing_considers_every_slot() {
    let executor = create_executor(
        SearchIndexConfig::default(),
        usize::MAX,
        &[
            observation("o1", "Patient/p1", &[("8480-6", 120)]),
            observation("o2", "Patient/p2", &[]),
        ],
    );

    let missing = |is_missing| {
        SearchOptions::new("Observation").with_expression(Expression::search_param(
            code_value_quantity(),
            Expression::missing(FieldName::TokenCode, is_missing).for_component(0),
        ))
    };

    let without = executor.search(&missing(true)).await.unwrap();
    let ids: Vec<_> = without.entries.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["o2"]);

    let with = executor.search(&missing(false)).await.unwrap();
    let ids: Vec<_> = with.entries.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["o1"]);
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_history_search_spans_both_partitions() {
    let config = SearchIndexConfig::default();
    let client = MemoryTableClient::new(&config);
    let v1 = patient("p1", "Smith", &[]);
    let v2 = IndexedResource::new(resource("Patient", "p1", "2"), v1.entries.clone());
    client
        .index(&v1.resource.clone().into_history(), &v1.entries)
        .unwrap();
    client.index(&v2.resource, &v2.entries).unwrap();
    assert_eq!(client.len(), 2);
    assert!(client.get("Patient_history", "p1:1").is_some());

    let executor = SearchExecutor::new(TableCompiler::new(&config), client, config);
    let options = SearchOptions::new("Patient").with_expression(family_is("Smith"));

    let live = executor.search(&options).await.unwrap();
    assert_eq!(live.entries.len(), 1);
    assert_eq!(live.entries[0].version_id, "2");

    let history = executor.search_history(&options).await.unwrap();
    let mut versions: Vec<_> = history
        .entries
        .iter()
        .map(|r| (r.version_id.clone(), r.is_history))
        .collect();
    versions.sort();
    assert_eq!(
        versions,
        vec![("1".to_string(), true), ("2".to_string(), false)]
    );
    assert!(history.entries.iter().all(|r| r.resource_type == "Patient"));
}

// ============================================================================
// Paging and Counting
// ============================================================================

#[tokio::test]
async fn test_continuation_has_no_gap_or_overlap() {
    let items: Vec<_> = (0..7)
        .map(|i| patient(&format!("p{}", i), "Smith", &[]))
        .collect();
    let executor = create_executor(SearchIndexConfig::default(), usize::MAX, &items);

    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let options = SearchOptions::new("Patient")
            .with_max_item_count(3)
            .with_continuation_token(token);
        let page = executor.search(&options).await.unwrap();
        assert!(page.entries.len() <= 3);
        seen.extend(page.entries.into_iter().map(|r| r.resource_id));
        token = page.continuation_token;
        if token.is_none() {
            break;
        }
    }

    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 7);
    assert_eq!(unique.len(), 7);
}

#[tokio::test]
async fn test_count_only_equals_result_length() {
    let items: Vec<_> = (0..12)
        .map(|i| patient(&format!("p{:02}", i), if i % 3 == 0 { "Smith" } else { "Jones" }, &[]))
        .collect();
    let executor = create_executor(SearchIndexConfig::default(), 5, &items);
    let options = SearchOptions::new("Patient")
        .with_expression(family_is("Jones"))
        .with_max_item_count(1000);

    let count = executor.count_only(&options).await.unwrap();
    let mut total = 0;
    let mut token = None;
    loop {
        let page = executor
            .search(&options.clone().with_continuation_token(token))
            .await
            .unwrap();
        total += page.entries.len();
        token = page.continuation_token;
        if token.is_none() {
            break;
        }
    }
    assert_eq!(count, 8);
    assert_eq!(count as usize, total);

    let with_total = executor.search(&options.clone().with_total()).await.unwrap();
    assert_eq!(with_total.total_count, Some(8));
}

#[tokio::test]
async fn test_empty_scan_pages_are_skipped() {
    let mut items: Vec<_> = (0..9)
        .map(|i| patient(&format!("p{}", i), "Jones", &[]))
        .collect();
    items.push(patient("p9", "Smith", &[]));
    let executor = create_executor(SearchIndexConfig::default(), 2, &items);

    let result = executor
        .search(&SearchOptions::new("Patient").with_expression(family_is("Smith")))
        .await
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].resource_id, "p9");
    assert!(!result.has_more());
}

// ============================================================================
// Capabilities
// ============================================================================

#[tokio::test]
async fn test_unsupported_constructs() {
    let executor = create_executor(SearchIndexConfig::default(), usize::MAX, &[]);

    let unsupported = [
        Expression::compartment("Patient", "p1"),
        Expression::chained(subject(), vec!["Patient".to_string()], family_is("Smith")),
        Expression::include(subject(), Some("Patient".to_string())),
        Expression::search_param(
            family(),
            Expression::string_match(FieldName::String, StringOperator::Contains, "mit", false),
        ),
    ];
    for expr in unsupported {
        let err = executor
            .search(&SearchOptions::new("Observation").with_expression(expr))
            .await
            .unwrap_err();
        match err {
            SearchIndexError::Search(SearchError::NotSupported { backend, .. }) => {
                assert_eq!(backend, "table");
            }
            other => panic!("expected NotSupported, got {other:?}"),
        }
    }
}
