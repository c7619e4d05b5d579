//! Deduplication and per-parameter slot assignment.
//!
//! Every projection runs the same policy before shaping storage: entries
//! (and materialized composite tuples) are turned into backend-neutral
//! property sets, duplicates collapse to their first occurrence, and each
//! parameter gets at most `max_index_combinations_per_type` slots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::IndexResult;
use crate::types::{
    FieldName, Literal, SearchIndexEntry, SearchParamType, SearchParameterInfo, SearchValue,
};

use super::composite;

/// A single projected property.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexProperty {
    /// The sub-field.
    pub field: FieldName,
    /// Component position for composite parameters.
    pub component: Option<usize>,
    /// The stored value.
    pub value: Literal,
}

/// An entry that survived deduplication and the combination cap.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedEntry {
    /// The parameter.
    pub param: Arc<SearchParameterInfo>,
    /// Zero-based slot within the parameter, in first-seen order.
    pub slot: usize,
    /// One value for simple parameters, one value per component for
    /// composite tuples.
    pub values: Vec<SearchValue>,
}

impl ProjectedEntry {
    /// Returns true for a materialized composite tuple.
    pub fn is_composite(&self) -> bool {
        self.param.is_composite()
    }

    /// Flattens the entry into its properties.
    pub fn properties(&self) -> Vec<IndexProperty> {
        let composite = self.is_composite();
        self.values
            .iter()
            .enumerate()
            .flat_map(|(i, value)| {
                let component = composite.then_some(i);
                value
                    .fields()
                    .into_iter()
                    .map(move |(field, value)| IndexProperty {
                        field,
                        component,
                        value,
                    })
            })
            .collect()
    }

    /// Dedup key: parameter name plus the sorted serialized properties.
    fn dedup_key(&self) -> String {
        let mut pairs: Vec<String> = self
            .properties()
            .iter()
            .map(|p| match p.component {
                Some(i) => format!("{}_{}={}", p.field.subfield(), i, p.value.canonical()),
                None => format!("{}={}", p.field.subfield(), p.value.canonical()),
            })
            .collect();
        pairs.sort();
        format!("{}|{}", self.param.name, pairs.join("|"))
    }
}

/// Counters describing what a projection kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    /// Entries written.
    pub kept: usize,
    /// Entries collapsed into an earlier identical entry.
    pub duplicates: usize,
    /// Entries past the per-parameter combination cap.
    pub dropped_by_cap: usize,
    /// Entries past the wide-column property budget.
    pub dropped_by_budget: usize,
    /// Composite tuples whose shape did not match the parameter definition.
    pub skipped_malformed: usize,
}

impl ProjectionStats {
    /// Total entries that were not written because of a limit.
    pub fn dropped(&self) -> usize {
        self.dropped_by_cap + self.dropped_by_budget
    }

    /// Emits a warning when anything was dropped.
    pub fn log_drops(&self, resource_type: &str, resource_id: &str) {
        if self.dropped() > 0 {
            warn!(
                resource_type,
                resource_id,
                kept = self.kept,
                dropped_by_cap = self.dropped_by_cap,
                dropped_by_budget = self.dropped_by_budget,
                "search index entries dropped"
            );
        }
    }
}

/// The shared projection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPolicy {
    max_combinations: usize,
}

impl IndexPolicy {
    /// Creates a policy with the given per-parameter cap.
    pub fn new(max_combinations: usize) -> Self {
        Self { max_combinations }
    }

    /// The per-parameter cap.
    pub fn max_combinations(&self) -> usize {
        self.max_combinations
    }

    /// Applies expansion, deduplication and the combination cap.
    ///
    /// Slot counters are local to this call, so each resource starts from
    /// slot zero for every parameter.
    pub fn apply(
        &self,
        entries: &[SearchIndexEntry],
    ) -> IndexResult<(Vec<ProjectedEntry>, ProjectionStats)> {
        let mut stats = ProjectionStats::default();
        let mut seen = HashSet::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut out = Vec::new();

        for entry in entries {
            entry.check_kind()?;

            for candidate in Self::materialize(entry, &mut stats) {
                if !seen.insert(candidate.dedup_key()) {
                    stats.duplicates += 1;
                    continue;
                }

                let next = slots.entry(entry.param.name.as_str()).or_insert(0);
                if *next >= self.max_combinations {
                    stats.dropped_by_cap += 1;
                    continue;
                }

                out.push(ProjectedEntry {
                    slot: *next,
                    ..candidate
                });
                *next += 1;
            }
        }

        stats.kept = out.len();
        Ok((out, stats))
    }

    fn materialize(entry: &SearchIndexEntry, stats: &mut ProjectionStats) -> Vec<ProjectedEntry> {
        let SearchValue::Composite(composite) = &entry.value else {
            return vec![ProjectedEntry {
                param: entry.param.clone(),
                slot: 0,
                values: vec![entry.value.clone()],
            }];
        };

        composite::expand(composite)
            .into_iter()
            .filter_map(|tuple| {
                if let Err(reason) = Self::check_tuple(&entry.param, &tuple) {
                    debug!(
                        param = %entry.param.name,
                        reason,
                        "skipping malformed composite tuple"
                    );
                    stats.skipped_malformed += 1;
                    return None;
                }
                Some(ProjectedEntry {
                    param: entry.param.clone(),
                    slot: 0,
                    values: tuple.into_iter().cloned().collect(),
                })
            })
            .collect()
    }

    fn check_tuple(
        param: &SearchParameterInfo,
        tuple: &[&SearchValue],
    ) -> Result<(), &'static str> {
        if tuple.len() != param.components.len() {
            return Err("component count differs from definition");
        }
        let kinds_match = tuple
            .iter()
            .zip(&param.components)
            .all(|(v, kind)| v.kind() == *kind && *kind != SearchParamType::Composite);
        if !kinds_match {
            return Err("component kind differs from definition");
        }
        Ok(())
    }
}
