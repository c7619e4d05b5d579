//! Native scalar values and searchable field names.
//!
//! [`Literal`] is the closed set of scalar values a projection stores and an
//! expression compares against. [`FieldName`] names every sub-field a search
//! value projects into; each backend maps it to its own column or property.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::SearchParamType;

/// A scalar value stored in an index or compared in a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    /// Text.
    String(String),
    /// 64-bit integer.
    Integer(i64),
    /// Arbitrary precision decimal.
    Decimal(Decimal),
    /// Boolean.
    Boolean(bool),
    /// UTC instant.
    DateTime(DateTime<Utc>),
}

impl Literal {
    /// Creates a string literal.
    pub fn string(s: impl Into<String>) -> Self {
        Literal::String(s.into())
    }

    /// Returns the string value if this is a String variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a canonical, type-tagged text form used for dedup keys.
    ///
    /// Decimals are normalized so `1.0` and `1.00` produce the same key.
    pub fn canonical(&self) -> String {
        match self {
            Literal::String(s) => format!("s:{}", s),
            Literal::Integer(i) => format!("i:{}", i),
            Literal::Decimal(d) => format!("d:{}", d.normalize()),
            Literal::Boolean(b) => format!("b:{}", b),
            Literal::DateTime(dt) => {
                format!("t:{}", dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
            }
        }
    }

    /// Compares two literals of compatible types.
    ///
    /// Integers and decimals compare numerically; strings compare ordinally.
    /// Returns `None` for incompatible types.
    pub fn compare(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::String(a), Literal::String(b)) => Some(a.cmp(b)),
            (Literal::Integer(a), Literal::Integer(b)) => Some(a.cmp(b)),
            (Literal::Decimal(a), Literal::Decimal(b)) => Some(a.cmp(b)),
            (Literal::Integer(a), Literal::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Literal::Decimal(a), Literal::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
            (Literal::Boolean(a), Literal::Boolean(b)) => Some(a.cmp(b)),
            (Literal::DateTime(a), Literal::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Returns the decimal as an `f64` for stores without a decimal type.
    pub fn decimal_as_f64(d: &Decimal) -> f64 {
        d.to_f64().unwrap_or(0.0)
    }
}

/// Formats an instant with seven fractional digits (100ns ticks).
///
/// Fixed width keeps lexical and chronological order identical, which the
/// document and relational stores rely on when comparing text timestamps.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        dt.format("%Y-%m-%dT%H:%M:%S"),
        dt.timestamp_subsec_nanos() / 100
    )
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{}", s),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Decimal(d) => write!(f, "{}", d.normalize()),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::DateTime(dt) => {
                write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Nanos, true))
            }
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::String(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Integer(i)
    }
}

impl From<Decimal> for Literal {
    fn from(d: Decimal) -> Self {
        Literal::Decimal(d)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(dt: DateTime<Utc>) -> Self {
        Literal::DateTime(dt)
    }
}

/// A searchable sub-field of a search value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldName {
    /// String value, exact form.
    String,
    /// String value, case-folded form.
    StringNormalized,
    /// Token system.
    TokenSystem,
    /// Token code.
    TokenCode,
    /// Token display text, exact form.
    TokenText,
    /// Token display text, case-folded form.
    TokenTextNormalized,
    /// Start of a date/time range.
    DateTimeStart,
    /// End of a date/time range.
    DateTimeEnd,
    /// Low bound of a number range.
    NumberLow,
    /// High bound of a number range.
    NumberHigh,
    /// Quantity unit system.
    QuantitySystem,
    /// Quantity unit code.
    QuantityCode,
    /// Low bound of a quantity range.
    QuantityLow,
    /// High bound of a quantity range.
    QuantityHigh,
    /// Base URI of an absolute reference.
    ReferenceBaseUri,
    /// Target resource type of a reference.
    ReferenceResourceType,
    /// Target resource id of a reference.
    ReferenceResourceId,
    /// URI value.
    Uri,
}

impl FieldName {
    /// Short property name used by the document and wide-column projections.
    pub fn subfield(&self) -> &'static str {
        match self {
            FieldName::String => "s",
            FieldName::StringNormalized => "sn",
            FieldName::TokenSystem => "system",
            FieldName::TokenCode => "code",
            FieldName::TokenText => "text",
            FieldName::TokenTextNormalized => "textn",
            FieldName::DateTimeStart => "start",
            FieldName::DateTimeEnd => "end",
            FieldName::NumberLow => "low",
            FieldName::NumberHigh => "high",
            FieldName::QuantitySystem => "qsystem",
            FieldName::QuantityCode => "qcode",
            FieldName::QuantityLow => "qlow",
            FieldName::QuantityHigh => "qhigh",
            FieldName::ReferenceBaseUri => "base",
            FieldName::ReferenceResourceType => "rtype",
            FieldName::ReferenceResourceId => "rid",
            FieldName::Uri => "uri",
        }
    }

    /// The value kind this field belongs to.
    pub fn kind(&self) -> SearchParamType {
        match self {
            FieldName::String | FieldName::StringNormalized => SearchParamType::String,
            FieldName::TokenSystem
            | FieldName::TokenCode
            | FieldName::TokenText
            | FieldName::TokenTextNormalized => SearchParamType::Token,
            FieldName::DateTimeStart | FieldName::DateTimeEnd => SearchParamType::Date,
            FieldName::NumberLow | FieldName::NumberHigh => SearchParamType::Number,
            FieldName::QuantitySystem
            | FieldName::QuantityCode
            | FieldName::QuantityLow
            | FieldName::QuantityHigh => SearchParamType::Quantity,
            FieldName::ReferenceBaseUri
            | FieldName::ReferenceResourceType
            | FieldName::ReferenceResourceId => SearchParamType::Reference,
            FieldName::Uri => SearchParamType::Uri,
        }
    }

    /// Returns the case-folded twin of a text field.
    pub fn normalized(&self) -> Option<FieldName> {
        match self {
            FieldName::String | FieldName::StringNormalized => Some(FieldName::StringNormalized),
            FieldName::TokenText | FieldName::TokenTextNormalized => {
                Some(FieldName::TokenTextNormalized)
            }
            _ => None,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subfield())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_canonical_normalizes_decimals() {
        let a = Literal::Decimal(Decimal::from_str("1.0").unwrap());
        let b = Literal::Decimal(Decimal::from_str("1.00").unwrap());
        assert_eq!(a.canonical(), b.canonical());
        assert_ne!(a.canonical(), Literal::string("1").canonical());
    }

    #[test]
    fn test_compare_mixed_numeric() {
        let int = Literal::Integer(5);
        let dec = Literal::Decimal(Decimal::from_str("5.5").unwrap());
        assert_eq!(int.compare(&dec), Some(Ordering::Less));
        assert_eq!(dec.compare(&int), Some(Ordering::Greater));
        assert_eq!(int.compare(&Literal::string("5")), None);
    }

    #[test]
    fn test_format_timestamp_fixed_width() {
        let dt = DateTime::parse_from_rfc3339("2024-03-31T23:59:59.9999999Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&dt), "2024-03-31T23:59:59.9999999Z");

        let dt = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&dt), "2024-01-01T00:00:00.0000000Z");
    }

    #[test]
    fn test_normalized_twins() {
        assert_eq!(FieldName::String.normalized(), Some(FieldName::StringNormalized));
        assert_eq!(
            FieldName::TokenText.normalized(),
            Some(FieldName::TokenTextNormalized)
        );
        assert_eq!(FieldName::TokenCode.normalized(), None);
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(FieldName::QuantityLow.kind(), SearchParamType::Quantity);
        assert_eq!(FieldName::ReferenceResourceId.kind(), SearchParamType::Reference);
        assert_eq!(FieldName::TokenTextNormalized.kind(), SearchParamType::Token);
    }
}
