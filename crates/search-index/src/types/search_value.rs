//! Typed search values.
//!
//! A [`SearchValue`] is what an external extractor produces for one occurrence
//! of a search parameter on a resource. Every variant knows how to project
//! itself into a flat list of [`FieldName`]/[`Literal`] pairs, which is the
//! backend-neutral shape the projection engine works with.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

use super::{FieldName, Literal, SearchParamType};

/// Smallest representable step of a stored timestamp (100ns).
pub const TICK_NANOS: i64 = 100;

/// Case-folds text for case-insensitive matching.
pub fn normalize_text(s: &str) -> String {
    s.trim().to_lowercase()
}

/// A single occurrence of a search parameter's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchValue {
    /// String value.
    String(StringValue),
    /// Token (system/code/text).
    Token(TokenValue),
    /// Date/time range.
    DateTime(DateTimeRange),
    /// Number range.
    Number(NumberRange),
    /// Quantity range.
    Quantity(QuantityRange),
    /// Reference to another resource.
    Reference(ReferenceValue),
    /// URI.
    Uri(UriValue),
    /// Correlated composite of non-composite values.
    Composite(CompositeValue),
}

impl SearchValue {
    /// Creates a string value.
    pub fn string(raw: impl Into<String>) -> Self {
        SearchValue::String(StringValue::new(raw))
    }

    /// Creates a token value from an optional system and code.
    pub fn token(system: Option<&str>, code: impl Into<String>) -> Self {
        SearchValue::Token(TokenValue::new(system.map(str::to_string), Some(code.into())))
    }

    /// Creates a date/time range from a (possibly partial) ISO-8601 string.
    pub fn date(value: &str) -> IndexResult<Self> {
        Ok(SearchValue::DateTime(DateTimeRange::from_partial(value)?))
    }

    /// Creates an exact number value.
    pub fn number(value: Decimal) -> Self {
        SearchValue::Number(NumberRange::exact(value))
    }

    /// Creates an exact quantity value.
    pub fn quantity(value: Decimal, system: Option<&str>, code: Option<&str>) -> Self {
        SearchValue::Quantity(QuantityRange::exact(
            value,
            system.map(str::to_string),
            code.map(str::to_string),
        ))
    }

    /// Creates a reference value from a reference string.
    pub fn reference(reference: &str) -> Self {
        SearchValue::Reference(ReferenceValue::parse(reference))
    }

    /// Creates a URI value.
    pub fn uri(value: impl Into<String>) -> Self {
        SearchValue::Uri(UriValue(value.into()))
    }

    /// Creates a composite value, rejecting nested composites and empty input.
    pub fn composite(components: Vec<Vec<SearchValue>>) -> IndexResult<Self> {
        Ok(SearchValue::Composite(CompositeValue::new(components)?))
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> SearchParamType {
        match self {
            SearchValue::String(_) => SearchParamType::String,
            SearchValue::Token(_) => SearchParamType::Token,
            SearchValue::DateTime(_) => SearchParamType::Date,
            SearchValue::Number(_) => SearchParamType::Number,
            SearchValue::Quantity(_) => SearchParamType::Quantity,
            SearchValue::Reference(_) => SearchParamType::Reference,
            SearchValue::Uri(_) => SearchParamType::Uri,
            SearchValue::Composite(_) => SearchParamType::Composite,
        }
    }

    /// Projects a non-composite value into its searchable fields.
    ///
    /// Absent optional parts produce no field. Composite values return an
    /// empty list; they are projected per materialized tuple instead.
    pub fn fields(&self) -> Vec<(FieldName, Literal)> {
        let mut fields = Vec::new();
        match self {
            SearchValue::String(s) => {
                fields.push((FieldName::String, Literal::string(&s.raw)));
                fields.push((FieldName::StringNormalized, Literal::string(&s.normalized)));
            }
            SearchValue::Token(t) => {
                if let Some(system) = &t.system {
                    fields.push((FieldName::TokenSystem, Literal::string(system)));
                }
                if let Some(code) = &t.code {
                    fields.push((FieldName::TokenCode, Literal::string(code)));
                }
                if let Some(text) = &t.text {
                    fields.push((FieldName::TokenText, Literal::string(&text.raw)));
                    fields.push((
                        FieldName::TokenTextNormalized,
                        Literal::string(&text.normalized),
                    ));
                }
            }
            SearchValue::DateTime(d) => {
                fields.push((FieldName::DateTimeStart, Literal::DateTime(d.start)));
                fields.push((FieldName::DateTimeEnd, Literal::DateTime(d.end)));
            }
            SearchValue::Number(n) => {
                if let Some(low) = n.low {
                    fields.push((FieldName::NumberLow, Literal::Decimal(low.normalize())));
                }
                if let Some(high) = n.high {
                    fields.push((FieldName::NumberHigh, Literal::Decimal(high.normalize())));
                }
            }
            SearchValue::Quantity(q) => {
                if let Some(system) = &q.system {
                    fields.push((FieldName::QuantitySystem, Literal::string(system)));
                }
                if let Some(code) = &q.code {
                    fields.push((FieldName::QuantityCode, Literal::string(code)));
                }
                if let Some(low) = q.low {
                    fields.push((FieldName::QuantityLow, Literal::Decimal(low.normalize())));
                }
                if let Some(high) = q.high {
                    fields.push((FieldName::QuantityHigh, Literal::Decimal(high.normalize())));
                }
            }
            SearchValue::Reference(r) => {
                if let Some(base) = &r.base_uri {
                    fields.push((FieldName::ReferenceBaseUri, Literal::string(base)));
                }
                if let Some(rt) = &r.resource_type {
                    fields.push((FieldName::ReferenceResourceType, Literal::string(rt)));
                }
                fields.push((
                    FieldName::ReferenceResourceId,
                    Literal::string(&r.resource_id),
                ));
            }
            SearchValue::Uri(u) => {
                fields.push((FieldName::Uri, Literal::string(&u.0)));
            }
            SearchValue::Composite(_) => {}
        }
        fields
    }
}

/// A string carried in exact and case-folded form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringValue {
    /// The text as extracted.
    pub raw: String,
    /// The case-folded text.
    pub normalized: String,
}

impl StringValue {
    /// Creates a string value, deriving the normalized form.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = normalize_text(&raw);
        Self { raw, normalized }
    }
}

/// A coded value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenValue {
    /// Code system URI.
    pub system: Option<String>,
    /// Code.
    pub code: Option<String>,
    /// Display text (Coding.display or CodeableConcept.text).
    pub text: Option<StringValue>,
}

impl TokenValue {
    /// Creates a token value without text.
    pub fn new(system: Option<String>, code: Option<String>) -> Self {
        Self {
            system,
            code,
            text: None,
        }
    }

    /// Attaches display text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(StringValue::new(text));
        self
    }
}

/// Precision of a partial date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    /// Year only (e.g., "2024")
    Year,
    /// Year and month (e.g., "2024-01")
    Month,
    /// Full date (e.g., "2024-01-15")
    Day,
    /// Date and time to minutes (e.g., "2024-01-15T10:30")
    Minute,
    /// Date and time to seconds (e.g., "2024-01-15T10:30:00")
    Second,
    /// Fractional seconds, carrying the number of digits.
    Fraction(u8),
}

static PARTIAL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?(Z|[+-]\d{2}:\d{2})?)?)?)?$",
    )
    .expect("partial date pattern is valid")
});

/// An inclusive date/time range.
///
/// Partial dates are always indexed as the range they cover, so `2024-03`
/// becomes `[2024-03-01T00:00:00Z, 2024-03-31T23:59:59.9999999Z]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateTimeRange {
    /// First instant covered.
    pub start: DateTime<Utc>,
    /// Last instant covered.
    pub end: DateTime<Utc>,
}

impl DateTimeRange {
    /// Creates a range from explicit bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Creates a single-instant range.
    pub fn point(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Parses a partial ISO-8601 date or date-time into the range it covers.
    ///
    /// Values without an offset are taken as UTC.
    pub fn from_partial(value: &str) -> IndexResult<Self> {
        let invalid = |message: &str| IndexError::InvalidDate {
            value: value.to_string(),
            message: message.to_string(),
        };

        let caps = PARTIAL_DATE
            .captures(value.trim())
            .ok_or_else(|| invalid("not an ISO-8601 date"))?;

        let num = |i: usize| -> Option<u32> { caps.get(i).and_then(|m| m.as_str().parse().ok()) };

        let year = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .ok_or_else(|| invalid("missing year"))?;
        let month = num(2);
        let day = num(3);
        let hour = num(4);
        let minute = num(5);
        let second = num(6);
        let fraction = caps.get(7).map(|m| m.as_str());
        let offset = caps.get(8).map(|m| m.as_str());

        let precision = match (month, day, hour, second, fraction) {
            (None, _, _, _, _) => DatePrecision::Year,
            (Some(_), None, _, _, _) => DatePrecision::Month,
            (Some(_), Some(_), None, _, _) => DatePrecision::Day,
            (Some(_), Some(_), Some(_), None, _) => DatePrecision::Minute,
            (Some(_), Some(_), Some(_), Some(_), None) => DatePrecision::Second,
            (Some(_), Some(_), Some(_), Some(_), Some(f)) => DatePrecision::Fraction(f.len() as u8),
        };

        let date = NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))
            .ok_or_else(|| invalid("date out of range"))?;

        let nanos = match fraction {
            Some(f) => {
                let padded = format!("{:0<9}", f);
                padded.parse::<u32>().map_err(|_| invalid("bad fraction"))?
            }
            None => 0,
        };

        let naive = date
            .and_hms_nano_opt(
                hour.unwrap_or(0),
                minute.unwrap_or(0),
                second.unwrap_or(0),
                nanos,
            )
            .ok_or_else(|| invalid("time out of range"))?;

        let start = match offset {
            None | Some("Z") => Utc.from_utc_datetime(&naive),
            Some(off) => {
                let offset = parse_offset(off).ok_or_else(|| invalid("bad offset"))?;
                offset
                    .from_local_datetime(&naive)
                    .single()
                    .ok_or_else(|| invalid("ambiguous local time"))?
                    .with_timezone(&Utc)
            }
        };

        let next = match precision {
            DatePrecision::Year => Utc
                .with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| invalid("year out of range"))?,
            DatePrecision::Month => {
                let (y, m) = if date.month() == 12 {
                    (year + 1, 1)
                } else {
                    (year, date.month() + 1)
                };
                Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
                    .single()
                    .ok_or_else(|| invalid("month out of range"))?
            }
            DatePrecision::Day => start + Duration::days(1),
            DatePrecision::Minute => start + Duration::minutes(1),
            DatePrecision::Second => start + Duration::seconds(1),
            DatePrecision::Fraction(digits) if digits < 7 => {
                start + Duration::nanoseconds(10i64.pow(9 - digits as u32))
            }
            DatePrecision::Fraction(_) => return Ok(Self::point(start)),
        };

        Ok(Self {
            start,
            end: next - Duration::nanoseconds(TICK_NANOS),
        })
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let (h, m) = s[1..].split_once(':')?;
    let secs = h.parse::<i32>().ok()? * 3600 + m.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * secs)
}

/// A numeric range; `low == high` for exact values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumberRange {
    /// Inclusive low bound, if bounded.
    pub low: Option<Decimal>,
    /// Inclusive high bound, if bounded.
    pub high: Option<Decimal>,
}

impl NumberRange {
    /// Creates an exact value.
    pub fn exact(value: Decimal) -> Self {
        Self {
            low: Some(value),
            high: Some(value),
        }
    }

    /// Creates a range.
    pub fn range(low: Option<Decimal>, high: Option<Decimal>) -> Self {
        Self { low, high }
    }
}

/// A quantity with unit and numeric range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantityRange {
    /// Unit system URI.
    pub system: Option<String>,
    /// Unit code.
    pub code: Option<String>,
    /// Inclusive low bound.
    pub low: Option<Decimal>,
    /// Inclusive high bound.
    pub high: Option<Decimal>,
}

impl QuantityRange {
    /// Creates an exact quantity.
    pub fn exact(value: Decimal, system: Option<String>, code: Option<String>) -> Self {
        Self {
            system,
            code,
            low: Some(value),
            high: Some(value),
        }
    }
}

/// A reference to another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceValue {
    /// Base URI for absolute references.
    pub base_uri: Option<String>,
    /// Target resource type, when known.
    pub resource_type: Option<String>,
    /// Target resource id (or the full reference when it cannot be split).
    pub resource_id: String,
}

static ABSOLUTE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://.+)/([A-Z][A-Za-z]+)/([A-Za-z0-9\-\.]{1,64})(?:/_history/.+)?$")
        .expect("reference pattern is valid")
});

static RELATIVE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Za-z]+)/([A-Za-z0-9\-\.]{1,64})(?:/_history/.+)?$")
        .expect("reference pattern is valid")
});

impl ReferenceValue {
    /// Creates a reference from its parts.
    pub fn new(
        base_uri: Option<String>,
        resource_type: Option<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            base_uri,
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Parses an absolute or relative reference string.
    ///
    /// Version suffixes (`/_history/n`) are ignored. Anything that does not
    /// look like `[base/]Type/id` is kept whole as the id.
    pub fn parse(reference: &str) -> Self {
        if let Some(caps) = ABSOLUTE_REFERENCE.captures(reference) {
            return Self::new(
                Some(caps[1].to_string()),
                Some(caps[2].to_string()),
                &caps[3],
            );
        }
        if let Some(caps) = RELATIVE_REFERENCE.captures(reference) {
            return Self::new(None, Some(caps[1].to_string()), &caps[2]);
        }
        Self::new(None, None, reference)
    }
}

/// A URI value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UriValue(pub String);

/// One correlated instance of a composite parameter.
///
/// Each component holds every sub-value found for that component within the
/// instance (for example several codings of one `Observation.component.code`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeValue {
    components: Vec<Vec<SearchValue>>,
}

impl CompositeValue {
    /// Creates a composite value.
    ///
    /// Empty component lists are allowed and void the instance during
    /// expansion; nested composites are rejected.
    pub fn new(components: Vec<Vec<SearchValue>>) -> IndexResult<Self> {
        if components.is_empty() {
            return Err(IndexError::EmptyComposite);
        }
        if components
            .iter()
            .flatten()
            .any(|v| matches!(v, SearchValue::Composite(_)))
        {
            return Err(IndexError::NestedComposite);
        }
        Ok(Self { components })
    }

    /// Returns the component lists.
    pub fn components(&self) -> &[Vec<SearchValue>] {
        &self.components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_string_normalization() {
        let v = StringValue::new("  O'Brien ");
        assert_eq!(v.raw, "  O'Brien ");
        assert_eq!(v.normalized, "o'brien");
    }

    #[test]
    fn test_partial_year() {
        let r = DateTimeRange::from_partial("2024").unwrap();
        assert_eq!(r.start, utc("2024-01-01T00:00:00Z"));
        assert_eq!(r.end, utc("2024-12-31T23:59:59.9999999Z"));
    }

    #[test]
    fn test_partial_month_december() {
        let r = DateTimeRange::from_partial("2023-12").unwrap();
        assert_eq!(r.start, utc("2023-12-01T00:00:00Z"));
        assert_eq!(r.end, utc("2023-12-31T23:59:59.9999999Z"));
    }

    #[test]
    fn test_partial_day_and_offset() {
        let r = DateTimeRange::from_partial("2024-02-29").unwrap();
        assert_eq!(r.end, utc("2024-02-29T23:59:59.9999999Z"));

        let r = DateTimeRange::from_partial("2024-01-15T10:30:00+02:00").unwrap();
        assert_eq!(r.start, utc("2024-01-15T08:30:00Z"));
        assert_eq!(r.end, utc("2024-01-15T08:30:00.9999999Z"));
    }

    #[test]
    fn test_fraction_precision() {
        let r = DateTimeRange::from_partial("2024-01-15T10:30:00.123Z").unwrap();
        assert_eq!(r.start, utc("2024-01-15T10:30:00.123Z"));
        assert_eq!(r.end, utc("2024-01-15T10:30:00.1239999Z"));
    }

    #[test]
    fn test_invalid_dates() {
        assert!(DateTimeRange::from_partial("2024-13").is_err());
        assert!(DateTimeRange::from_partial("yesterday").is_err());
        assert!(DateTimeRange::from_partial("2023-02-29").is_err());
    }

    #[test]
    fn test_parse_references() {
        let r = ReferenceValue::parse("Patient/123");
        assert_eq!(r.resource_type.as_deref(), Some("Patient"));
        assert_eq!(r.resource_id, "123");
        assert!(r.base_uri.is_none());

        let r = ReferenceValue::parse("http://example.org/fhir/Patient/abc/_history/2");
        assert_eq!(r.base_uri.as_deref(), Some("http://example.org/fhir"));
        assert_eq!(r.resource_type.as_deref(), Some("Patient"));
        assert_eq!(r.resource_id, "abc");

        let r = ReferenceValue::parse("urn:uuid:1234");
        assert!(r.resource_type.is_none());
        assert_eq!(r.resource_id, "urn:uuid:1234");
    }

    #[test]
    fn test_composite_rejects_nesting() {
        let inner = SearchValue::composite(vec![vec![SearchValue::string("a")]]).unwrap();
        let err = SearchValue::composite(vec![vec![inner]]).unwrap_err();
        assert_eq!(err, IndexError::NestedComposite);
        assert_eq!(
            SearchValue::composite(vec![]).unwrap_err(),
            IndexError::EmptyComposite
        );
    }

    #[test]
    fn test_token_fields_skip_absent_parts() {
        let v = SearchValue::Token(TokenValue::new(None, Some("A".into())).with_text("Alpha"));
        let fields: Vec<FieldName> = v.fields().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            fields,
            vec![
                FieldName::TokenCode,
                FieldName::TokenText,
                FieldName::TokenTextNormalized
            ]
        );
    }

    #[test]
    fn test_quantity_fields_normalize_decimals() {
        let v = SearchValue::quantity(
            Decimal::from_str("5.40").unwrap(),
            Some("http://unitsofmeasure.org"),
            Some("mg"),
        );
        let low = v
            .fields()
            .into_iter()
            .find(|(f, _)| *f == FieldName::QuantityLow)
            .unwrap()
            .1;
        assert_eq!(low.to_string(), "5.4");
    }
}
