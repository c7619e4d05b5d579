//! Composite expansion.
//!
//! A composite instance carries, per component, every sub-value found for
//! that instance. Expansion materializes the Cartesian product of those lists
//! so each tuple can be indexed (and matched) as one correlated unit.

use crate::types::{CompositeValue, SearchValue};

/// Materializes every tuple of a composite instance.
///
/// For component lists of sizes `m × n × …` this returns exactly that many
/// tuples, in lexicographic order of the component positions. An empty
/// component list voids the instance.
pub fn expand(value: &CompositeValue) -> Vec<Vec<&SearchValue>> {
    let mut tuples: Vec<Vec<&SearchValue>> = vec![Vec::new()];

    for component in value.components() {
        if component.is_empty() {
            return Vec::new();
        }

        let mut next = Vec::with_capacity(tuples.len() * component.len());
        for prefix in &tuples {
            for v in component {
                let mut tuple = Vec::with_capacity(prefix.len() + 1);
                tuple.extend_from_slice(prefix);
                tuple.push(v);
                next.push(tuple);
            }
        }
        tuples = next;
    }

    tuples
}

/// Returns the number of tuples [`expand`] would produce.
pub fn tuple_count(value: &CompositeValue) -> usize {
    value.components().iter().map(Vec::len).product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn code_value(codes: &[&str], values: &[i64]) -> CompositeValue {
        CompositeValue::new(vec![
            codes
                .iter()
                .map(|c| SearchValue::token(Some("http://loinc.org"), *c))
                .collect(),
            values
                .iter()
                .map(|v| SearchValue::quantity(Decimal::from(*v), None, Some("mm[Hg]")))
                .collect(),
        ])
        .unwrap()
    }

    #[test]
    fn test_expand_is_cartesian() {
        let value = code_value(&["8480-6", "8462-4", "55284-4"], &[120, 80]);
        let tuples = expand(&value);
        assert_eq!(tuples.len(), 6);
        assert_eq!(tuple_count(&value), 6);

        for (i, a) in tuples.iter().enumerate() {
            for b in tuples.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(tuples[0][0], &SearchValue::token(Some("http://loinc.org"), "8480-6"));
        assert_eq!(tuples[1][1], &SearchValue::quantity(Decimal::from(80), None, Some("mm[Hg]")));
    }

    #[test]
    fn test_single_value_lists_are_identity() {
        let value = code_value(&["8480-6"], &[120]);
        assert_eq!(expand(&value).len(), 1);
    }

    #[test]
    fn test_empty_component_voids_instance() {
        let value = code_value(&["8480-6", "8462-4"], &[]);
        assert!(expand(&value).is_empty());
        assert_eq!(tuple_count(&value), 0);
    }
}
