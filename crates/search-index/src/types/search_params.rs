//! Search parameter identity.
//!
//! The catalog of search parameter definitions lives outside this crate. The
//! core only references [`SearchParameterInfo`] values through an [`Arc`] and
//! never mutates them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The `_type` parameter, bound to the storage partition/type column.
pub const RESOURCE_TYPE_PARAM: &str = "_type";

/// The `_id` parameter, bound to the storage row key/id column.
pub const ID_PARAM: &str = "_id";

/// The `_lastUpdated` parameter, bound to the storage last-modified column.
pub const LAST_UPDATED_PARAM: &str = "_lastUpdated";

/// FHIR search parameter value kinds.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// A composite search parameter that combines others.
    Composite,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Composite => write!(f, "composite"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "composite" => Ok(SearchParamType::Composite),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Identity of a search parameter as seen by the indexing core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchParameterInfo {
    /// The parameter code (e.g., "identifier", "code-value-quantity").
    pub name: String,

    /// The canonical URL of the SearchParameter definition.
    pub url: String,

    /// The value kind of the parameter.
    pub param_type: SearchParamType,

    /// Component kinds, in definition order, for composite parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<SearchParamType>,
}

impl SearchParameterInfo {
    /// Creates a non-composite parameter.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        param_type: SearchParamType,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            param_type,
            components: Vec::new(),
        }
    }

    /// Creates a composite parameter with the given component kinds.
    pub fn composite(
        name: impl Into<String>,
        url: impl Into<String>,
        components: Vec<SearchParamType>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            param_type: SearchParamType::Composite,
            components,
        }
    }

    /// Wraps this definition in an [`Arc`] for sharing across entries.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Returns true for composite parameters.
    pub fn is_composite(&self) -> bool {
        self.param_type == SearchParamType::Composite
    }

    /// Returns the kind of the component at `index`, if any.
    pub fn component_type(&self, index: usize) -> Option<SearchParamType> {
        self.components.get(index).copied()
    }

    /// Returns true if this parameter binds to a native storage field rather
    /// than to generated index slots.
    pub fn is_native_field(&self) -> bool {
        matches!(
            self.name.as_str(),
            RESOURCE_TYPE_PARAM | ID_PARAM | LAST_UPDATED_PARAM
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_type_round_trip() {
        for ty in [
            SearchParamType::String,
            SearchParamType::Uri,
            SearchParamType::Number,
            SearchParamType::Date,
            SearchParamType::Quantity,
            SearchParamType::Token,
            SearchParamType::Reference,
            SearchParamType::Composite,
        ] {
            assert_eq!(ty.to_string().parse::<SearchParamType>().unwrap(), ty);
        }
        assert!("special".parse::<SearchParamType>().is_err());
    }

    #[test]
    fn test_composite_info() {
        let info = SearchParameterInfo::composite(
            "code-value-quantity",
            "http://hl7.org/fhir/SearchParameter/Observation-code-value-quantity",
            vec![SearchParamType::Token, SearchParamType::Quantity],
        );
        assert!(info.is_composite());
        assert_eq!(info.component_type(1), Some(SearchParamType::Quantity));
        assert_eq!(info.component_type(2), None);
    }

    #[test]
    fn test_native_field_params() {
        let id = SearchParameterInfo::new(ID_PARAM, "", SearchParamType::Token);
        let name = SearchParameterInfo::new("name", "", SearchParamType::String);
        assert!(id.is_native_field());
        assert!(!name.is_native_field());
    }
}
