//! Shared fixtures for the search index integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use helios_search_index::index::{IndexedResource, StaticIdResolver};
use helios_search_index::types::{
    ResourceWrapper, SearchIndexEntry, SearchParamType, SearchParameterInfo, SearchValue,
};

/// Canonical url prefix for fixture parameters.
pub const BASE: &str = "http://hl7.org/fhir/SearchParameter/";

/// Fixed write time so projections are reproducible.
pub fn written_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn identifier() -> Arc<SearchParameterInfo> {
    SearchParameterInfo::new(
        "identifier",
        format!("{}Patient-identifier", BASE),
        SearchParamType::Token,
    )
    .shared()
}

pub fn family() -> Arc<SearchParameterInfo> {
    SearchParameterInfo::new(
        "family",
        format!("{}individual-family", BASE),
        SearchParamType::String,
    )
    .shared()
}

pub fn subject() -> Arc<SearchParameterInfo> {
    SearchParameterInfo::new(
        "subject",
        format!("{}Observation-subject", BASE),
        SearchParamType::Reference,
    )
    .shared()
}

pub fn code_value_quantity() -> Arc<SearchParameterInfo> {
    SearchParameterInfo::composite(
        "code-value-quantity",
        format!("{}Observation-code-value-quantity", BASE),
        vec![SearchParamType::Token, SearchParamType::Quantity],
    )
    .shared()
}

/// Resolver with every fixture type and parameter registered.
pub fn resolver() -> Arc<StaticIdResolver> {
    let resolver = StaticIdResolver::new();
    for resource_type in ["Patient", "Observation"] {
        resolver.register_resource_type(resource_type).unwrap();
    }
    for param in [identifier(), family(), subject(), code_value_quantity()] {
        resolver.register_search_param(&param.url).unwrap();
    }
    Arc::new(resolver)
}

pub fn resource(resource_type: &str, id: &str, version: &str) -> ResourceWrapper {
    ResourceWrapper::new(
        resource_type,
        id,
        version,
        written_at(),
        json!({"resourceType": resource_type, "id": id, "meta": {"versionId": version}}),
    )
}

/// A patient with a family name and `(system, value)` identifiers.
pub fn patient(id: &str, family_name: &str, identifiers: &[(&str, &str)]) -> IndexedResource {
    let mut entries = vec![SearchIndexEntry::new(
        family(),
        SearchValue::string(family_name),
    )];
    entries.extend(identifiers.iter().map(|(system, value)| {
        SearchIndexEntry::new(identifier(), SearchValue::token(Some(*system), *value))
    }));
    IndexedResource::new(resource("Patient", id, "1"), entries)
}

/// A blood-pressure style observation: one composite value per
/// `(code, value)` pair, plus its subject reference.
pub fn observation(id: &str, subject_ref: &str, components: &[(&str, i64)]) -> IndexedResource {
    let mut entries = vec![SearchIndexEntry::new(
        subject(),
        SearchValue::reference(subject_ref),
    )];
    for (code, value) in components {
        let composite = SearchValue::composite(vec![
            vec![SearchValue::token(Some("http://loinc.org"), *code)],
            vec![SearchValue::quantity(
                Decimal::from(*value),
                Some("http://unitsofmeasure.org"),
                Some("mm[Hg]"),
            )],
        ])
        .unwrap();
        entries.push(SearchIndexEntry::new(code_value_quantity(), composite));
    }
    IndexedResource::new(resource("Observation", id, "1"), entries)
}
