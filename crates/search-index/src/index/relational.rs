//! Relational projection.
//!
//! Values are written to one table per value kind. Rows reference their
//! resource by its offset within the write batch; the writer swaps the offset
//! for the surrogate id it assigns on insert.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::config::SearchIndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::types::{
    FieldName, Literal, ResourceWrapper, SearchIndexEntry, SearchParamType, SearchValue,
};

use super::IndexedResource;
use super::policy::{IndexPolicy, ProjectionStats};

/// Resolves names to the small integer ids the relational schema stores.
pub trait IdResolver: Send + Sync {
    /// Returns the id of a resource type.
    fn resource_type_id(&self, resource_type: &str) -> IndexResult<i16>;

    /// Returns the id of a search parameter by canonical url.
    fn search_param_id(&self, url: &str) -> IndexResult<i16>;
}

impl<T: IdResolver + ?Sized> IdResolver for std::sync::Arc<T> {
    fn resource_type_id(&self, resource_type: &str) -> IndexResult<i16> {
        (**self).resource_type_id(resource_type)
    }

    fn search_param_id(&self, url: &str) -> IndexResult<i16> {
        (**self).search_param_id(url)
    }
}

/// An [`IdResolver`] backed by in-memory maps.
///
/// Unknown names are rejected; register them up front.
#[derive(Debug, Default)]
pub struct StaticIdResolver {
    resource_types: RwLock<HashMap<String, i16>>,
    search_params: RwLock<HashMap<String, i16>>,
}

impl StaticIdResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource type, returning its id.
    pub fn register_resource_type(&self, resource_type: &str) -> IndexResult<i16> {
        register(&self.resource_types, resource_type, "resource type")
    }

    /// Registers a search parameter url, returning its id.
    pub fn register_search_param(&self, url: &str) -> IndexResult<i16> {
        register(&self.search_params, url, "search parameter")
    }
}

/// Returns the id of `key`, assigning the next one on first sight.
fn register(map: &RwLock<HashMap<String, i16>>, key: &str, registry: &str) -> IndexResult<i16> {
    let mut map = map.write();
    if let Some(id) = map.get(key) {
        return Ok(*id);
    }
    let next = i16::try_from(map.len() + 1).map_err(|_| IndexError::IdSpaceExhausted {
        registry: registry.to_string(),
    })?;
    map.insert(key.to_string(), next);
    Ok(next)
}

impl IdResolver for StaticIdResolver {
    fn resource_type_id(&self, resource_type: &str) -> IndexResult<i16> {
        self.resource_types
            .read()
            .get(resource_type)
            .copied()
            .ok_or_else(|| IndexError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
    }

    fn search_param_id(&self, url: &str) -> IndexResult<i16> {
        self.search_params
            .read()
            .get(url)
            .copied()
            .ok_or_else(|| IndexError::UnknownSearchParameter {
                url: url.to_string(),
            })
    }
}

/// The per-kind search parameter tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    /// `string_search_param`
    String,
    /// `token_search_param`
    Token,
    /// `token_text_search_param`
    TokenText,
    /// `date_time_search_param`
    DateTime,
    /// `number_search_param`
    Number,
    /// `quantity_search_param`
    Quantity,
    /// `reference_search_param`
    Reference,
    /// `uri_search_param`
    Uri,
}

impl RowKind {
    /// Every table, in schema creation order.
    pub const ALL: [RowKind; 8] = [
        RowKind::String,
        RowKind::Token,
        RowKind::TokenText,
        RowKind::DateTime,
        RowKind::Number,
        RowKind::Quantity,
        RowKind::Reference,
        RowKind::Uri,
    ];

    /// Table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            RowKind::String => "string_search_param",
            RowKind::Token => "token_search_param",
            RowKind::TokenText => "token_text_search_param",
            RowKind::DateTime => "date_time_search_param",
            RowKind::Number => "number_search_param",
            RowKind::Quantity => "quantity_search_param",
            RowKind::Reference => "reference_search_param",
            RowKind::Uri => "uri_search_param",
        }
    }

    /// Value columns with their SQL types.
    pub fn value_columns(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            RowKind::String | RowKind::TokenText => {
                &[("text", "TEXT"), ("text_normalized", "TEXT")]
            }
            RowKind::Token => &[("system", "TEXT"), ("code", "TEXT")],
            RowKind::DateTime => &[("start_date_time", "TEXT"), ("end_date_time", "TEXT")],
            RowKind::Number => &[("low_value", "REAL"), ("high_value", "REAL")],
            RowKind::Quantity => &[
                ("system", "TEXT"),
                ("code", "TEXT"),
                ("low_value", "REAL"),
                ("high_value", "REAL"),
            ],
            RowKind::Reference => &[
                ("base_uri", "TEXT"),
                ("reference_resource_type", "TEXT"),
                ("reference_resource_id", "TEXT"),
            ],
            RowKind::Uri => &[("uri", "TEXT")],
        }
    }
}

/// Maps a searchable field to the table and column holding it.
pub fn column_for(field: FieldName) -> (RowKind, &'static str) {
    match field {
        FieldName::String => (RowKind::String, "text"),
        FieldName::StringNormalized => (RowKind::String, "text_normalized"),
        FieldName::TokenSystem => (RowKind::Token, "system"),
        FieldName::TokenCode => (RowKind::Token, "code"),
        FieldName::TokenText => (RowKind::TokenText, "text"),
        FieldName::TokenTextNormalized => (RowKind::TokenText, "text_normalized"),
        FieldName::DateTimeStart => (RowKind::DateTime, "start_date_time"),
        FieldName::DateTimeEnd => (RowKind::DateTime, "end_date_time"),
        FieldName::NumberLow => (RowKind::Number, "low_value"),
        FieldName::NumberHigh => (RowKind::Number, "high_value"),
        FieldName::QuantitySystem => (RowKind::Quantity, "system"),
        FieldName::QuantityCode => (RowKind::Quantity, "code"),
        FieldName::QuantityLow => (RowKind::Quantity, "low_value"),
        FieldName::QuantityHigh => (RowKind::Quantity, "high_value"),
        FieldName::ReferenceBaseUri => (RowKind::Reference, "base_uri"),
        FieldName::ReferenceResourceType => (RowKind::Reference, "reference_resource_type"),
        FieldName::ReferenceResourceId => (RowKind::Reference, "reference_resource_id"),
        FieldName::Uri => (RowKind::Uri, "uri"),
    }
}

/// Typed column values of one row.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum RowData {
    String {
        text: String,
        text_normalized: String,
    },
    Token {
        system: Option<String>,
        code: Option<String>,
    },
    TokenText {
        text: String,
        text_normalized: String,
    },
    DateTime {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Number {
        low: Option<Decimal>,
        high: Option<Decimal>,
    },
    Quantity {
        system: Option<String>,
        code: Option<String>,
        low: Option<Decimal>,
        high: Option<Decimal>,
    },
    Reference {
        base_uri: Option<String>,
        resource_type: Option<String>,
        resource_id: String,
    },
    Uri {
        uri: String,
    },
}

impl RowData {
    /// The table this row belongs to.
    pub fn kind(&self) -> RowKind {
        match self {
            RowData::String { .. } => RowKind::String,
            RowData::Token { .. } => RowKind::Token,
            RowData::TokenText { .. } => RowKind::TokenText,
            RowData::DateTime { .. } => RowKind::DateTime,
            RowData::Number { .. } => RowKind::Number,
            RowData::Quantity { .. } => RowKind::Quantity,
            RowData::Reference { .. } => RowKind::Reference,
            RowData::Uri { .. } => RowKind::Uri,
        }
    }

    /// Values in the order of [`RowKind::value_columns`]; `None` is NULL.
    pub fn values(&self) -> Vec<Option<Literal>> {
        let s = |v: &Option<String>| v.as_ref().map(Literal::string);
        let d = |v: &Option<Decimal>| v.map(Literal::Decimal);
        match self {
            RowData::String {
                text,
                text_normalized,
            }
            | RowData::TokenText {
                text,
                text_normalized,
            } => vec![Some(Literal::string(text)), Some(Literal::string(text_normalized))],
            RowData::Token { system, code } => vec![s(system), s(code)],
            RowData::DateTime { start, end } => {
                vec![Some(Literal::DateTime(*start)), Some(Literal::DateTime(*end))]
            }
            RowData::Number { low, high } => vec![d(low), d(high)],
            RowData::Quantity {
                system,
                code,
                low,
                high,
            } => vec![s(system), s(code), d(low), d(high)],
            RowData::Reference {
                base_uri,
                resource_type,
                resource_id,
            } => vec![s(base_uri), s(resource_type), Some(Literal::string(resource_id))],
            RowData::Uri { uri } => vec![Some(Literal::string(uri))],
        }
    }
}

/// One row of a search parameter table.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParamRow {
    /// Resource type id of the owning resource.
    pub resource_type_id: i16,
    /// Zero-based position of the owning resource in the write batch.
    pub offset: usize,
    /// Search parameter id.
    pub search_param_id: i16,
    /// Component position for composite parameters.
    pub component_index: Option<usize>,
    /// Shared by every row of one composite tuple.
    pub composite_instance_id: Option<u32>,
    /// Column values.
    pub data: RowData,
}

impl SearchParamRow {
    /// The table this row belongs to.
    pub fn kind(&self) -> RowKind {
        self.data.kind()
    }
}

type RowBuilder = fn(&SearchValue) -> Vec<RowData>;

/// Row builders keyed by value kind.
static ROW_BUILDERS: [(SearchParamType, RowBuilder); 7] = [
    (SearchParamType::String, string_rows),
    (SearchParamType::Token, token_rows),
    (SearchParamType::Date, date_rows),
    (SearchParamType::Number, number_rows),
    (SearchParamType::Quantity, quantity_rows),
    (SearchParamType::Reference, reference_rows),
    (SearchParamType::Uri, uri_rows),
];

fn row_builder(kind: SearchParamType) -> Option<RowBuilder> {
    ROW_BUILDERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, builder)| *builder)
}

fn string_rows(value: &SearchValue) -> Vec<RowData> {
    match value {
        SearchValue::String(s) => vec![RowData::String {
            text: s.raw.clone(),
            text_normalized: s.normalized.clone(),
        }],
        _ => Vec::new(),
    }
}

fn token_rows(value: &SearchValue) -> Vec<RowData> {
    let SearchValue::Token(t) = value else {
        return Vec::new();
    };
    let mut rows = Vec::with_capacity(2);
    if t.system.is_some() || t.code.is_some() {
        rows.push(RowData::Token {
            system: t.system.clone(),
            code: t.code.clone(),
        });
    }
    if let Some(text) = &t.text {
        rows.push(RowData::TokenText {
            text: text.raw.clone(),
            text_normalized: text.normalized.clone(),
        });
    }
    rows
}

fn date_rows(value: &SearchValue) -> Vec<RowData> {
    match value {
        SearchValue::DateTime(d) => vec![RowData::DateTime {
            start: d.start,
            end: d.end,
        }],
        _ => Vec::new(),
    }
}

fn number_rows(value: &SearchValue) -> Vec<RowData> {
    match value {
        SearchValue::Number(n) => vec![RowData::Number {
            low: n.low.map(|d| d.normalize()),
            high: n.high.map(|d| d.normalize()),
        }],
        _ => Vec::new(),
    }
}

fn quantity_rows(value: &SearchValue) -> Vec<RowData> {
    match value {
        SearchValue::Quantity(q) => vec![RowData::Quantity {
            system: q.system.clone(),
            code: q.code.clone(),
            low: q.low.map(|d| d.normalize()),
            high: q.high.map(|d| d.normalize()),
        }],
        _ => Vec::new(),
    }
}

fn reference_rows(value: &SearchValue) -> Vec<RowData> {
    match value {
        SearchValue::Reference(r) => vec![RowData::Reference {
            base_uri: r.base_uri.clone(),
            resource_type: r.resource_type.clone(),
            resource_id: r.resource_id.clone(),
        }],
        _ => Vec::new(),
    }
}

fn uri_rows(value: &SearchValue) -> Vec<RowData> {
    match value {
        SearchValue::Uri(u) => vec![RowData::Uri { uri: u.0.clone() }],
        _ => Vec::new(),
    }
}

/// Builds relational rows for batches of resources.
pub struct RelationalIndexGenerator<R: IdResolver> {
    policy: IndexPolicy,
    resolver: R,
}

impl<R: IdResolver> RelationalIndexGenerator<R> {
    /// Creates a generator.
    pub fn new(config: &SearchIndexConfig, resolver: R) -> Self {
        Self {
            policy: IndexPolicy::new(config.max_index_combinations_per_type),
            resolver,
        }
    }

    /// The id resolver.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Builds the rows of one resource at position `offset` of its batch.
    ///
    /// Composite instance ids are assigned in tuple materialization order.
    pub fn generate(
        &self,
        offset: usize,
        resource: &ResourceWrapper,
        entries: &[SearchIndexEntry],
    ) -> IndexResult<(Vec<SearchParamRow>, ProjectionStats)> {
        let resource_type_id = self.resolver.resource_type_id(&resource.resource_type)?;
        let (projected, stats) = self.policy.apply(entries)?;
        stats.log_drops(&resource.resource_type, &resource.resource_id);

        let mut rows = Vec::new();
        let mut next_instance = 0u32;

        for entry in &projected {
            let search_param_id = self.resolver.search_param_id(&entry.param.url)?;
            let composite = entry.is_composite();
            let instance = composite.then(|| {
                next_instance += 1;
                next_instance - 1
            });

            for (i, value) in entry.values.iter().enumerate() {
                let Some(builder) = row_builder(value.kind()) else {
                    continue;
                };
                for data in builder(value) {
                    rows.push(SearchParamRow {
                        resource_type_id,
                        offset,
                        search_param_id,
                        component_index: composite.then_some(i),
                        composite_instance_id: instance,
                        data,
                    });
                }
            }
        }

        Ok((rows, stats))
    }

    /// Streams the rows of every resource in a batch.
    ///
    /// Resources are projected lazily, one at a time, as the iterator is
    /// consumed.
    pub fn generate_batch<'a>(
        &'a self,
        batch: &'a [IndexedResource],
    ) -> impl Iterator<Item = IndexResult<SearchParamRow>> + 'a {
        batch.iter().enumerate().flat_map(move |(offset, item)| {
            match self.generate(offset, &item.resource, &item.entries) {
                Ok((rows, _)) => rows.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SearchParameterInfo, TokenValue};
    use chrono::TimeZone;
    use serde_json::json;

    fn resource(id: &str) -> ResourceWrapper {
        ResourceWrapper::new(
            "Observation",
            id,
            "1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            json!({}),
        )
    }

    fn resolver() -> StaticIdResolver {
        let resolver = StaticIdResolver::new();
        resolver.register_resource_type("Observation").unwrap();
        resolver.register_search_param("http://example.org/code").unwrap();
        resolver.register_search_param("http://example.org/code-value-quantity").unwrap();
        resolver
    }

    #[test]
    fn test_token_with_text_emits_two_rows() {
        let code =
            SearchParameterInfo::new("code", "http://example.org/code", SearchParamType::Token)
                .shared();
        let value = SearchValue::Token(
            TokenValue::new(Some("http://loinc.org".into()), Some("8480-6".into()))
                .with_text("Systolic BP"),
        );
        let generator = RelationalIndexGenerator::new(&SearchIndexConfig::default(), resolver());
        let (rows, _) = generator
            .generate(0, &resource("o1"), &[SearchIndexEntry::new(code, value)])
            .unwrap();
        let kinds: Vec<_> = rows.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![RowKind::Token, RowKind::TokenText]);
        assert_eq!(rows[1].data.values()[1], Some(Literal::string("systolic bp")));
    }

    #[test]
    fn test_composite_rows_share_instance_id() {
        let param = SearchParameterInfo::composite(
            "code-value-quantity",
            "http://example.org/code-value-quantity",
            vec![SearchParamType::Token, SearchParamType::Quantity],
        )
        .shared();
        let value = SearchValue::composite(vec![
            vec![
                SearchValue::token(Some("http://loinc.org"), "8480-6"),
                SearchValue::token(Some("http://loinc.org"), "8462-4"),
            ],
            vec![SearchValue::quantity(Decimal::from(120), None, Some("mm[Hg]"))],
        ])
        .unwrap();

        let generator = RelationalIndexGenerator::new(&SearchIndexConfig::default(), resolver());
        let (rows, _) = generator
            .generate(0, &resource("o1"), &[SearchIndexEntry::new(param, value)])
            .unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].composite_instance_id, Some(0));
        assert_eq!(rows[1].composite_instance_id, Some(0));
        assert_eq!(rows[2].composite_instance_id, Some(1));
        assert_eq!(rows[1].component_index, Some(1));
        assert_eq!(rows[1].kind(), RowKind::Quantity);
    }

    #[test]
    fn test_batch_offsets_and_unknown_ids() {
        let code =
            SearchParameterInfo::new("code", "http://example.org/code", SearchParamType::Token)
                .shared();
        let batch = vec![
            IndexedResource::new(
                resource("o1"),
                vec![SearchIndexEntry::new(code.clone(), SearchValue::token(None, "a"))],
            ),
            IndexedResource::new(
                resource("o2"),
                vec![SearchIndexEntry::new(code, SearchValue::token(None, "b"))],
            ),
        ];
        let generator = RelationalIndexGenerator::new(&SearchIndexConfig::default(), resolver());
        let rows: Vec<_> = generator
            .generate_batch(&batch)
            .collect::<IndexResult<_>>()
            .unwrap();
        let offsets: Vec<usize> = rows.iter().map(|r: &SearchParamRow| r.offset).collect();
        assert_eq!(offsets, vec![0, 1]);

        let unknown = SearchParameterInfo::new("x", "http://example.org/x", SearchParamType::Uri)
            .shared();
        let batch = vec![IndexedResource::new(
            resource("o3"),
            vec![SearchIndexEntry::new(unknown, SearchValue::uri("urn:x"))],
        )];
        let first = generator.generate_batch(&batch).next().unwrap();
        assert!(matches!(first, Err(IndexError::UnknownSearchParameter { .. })));
    }

    #[test]
    fn test_registration_stops_at_the_id_limit() {
        let resolver = StaticIdResolver::new();
        for i in 0..i16::MAX {
            resolver.register_search_param(&format!("urn:param:{}", i)).unwrap();
        }
        assert_eq!(resolver.register_search_param("urn:param:0").unwrap(), 1);
        assert_eq!(
            resolver.register_search_param("urn:param:overflow").unwrap_err(),
            IndexError::IdSpaceExhausted {
                registry: "search parameter".to_string()
            }
        );
        assert_eq!(resolver.register_resource_type("Patient").unwrap(), 1);
    }
}
