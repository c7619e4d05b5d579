//! Backend-agnostic search expressions.
//!
//! An [`Expression`] tree is produced by an external parser from request
//! parameters and consumed by the backend compilers in [`crate::compiler`].
//! Trees are immutable once built.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{FieldName, Literal, SearchParameterInfo};

/// Comparison operators for [`Expression::Binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    /// `=`
    Equal,
    /// `<>`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
}

impl BinaryOperator {
    /// The SQL spelling of this operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
        }
    }

    /// The OData spelling of this operator.
    pub fn as_odata(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "eq",
            BinaryOperator::NotEqual => "ne",
            BinaryOperator::GreaterThan => "gt",
            BinaryOperator::GreaterThanOrEqual => "ge",
            BinaryOperator::LessThan => "lt",
            BinaryOperator::LessThanOrEqual => "le",
        }
    }
}

/// String matching operators for [`Expression::StringMatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringOperator {
    /// Whole-value match.
    Equals,
    /// Prefix match.
    StartsWith,
    /// Substring match.
    Contains,
    /// Suffix match.
    EndsWith,
}

impl fmt::Display for StringOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringOperator::Equals => write!(f, "equals"),
            StringOperator::StartsWith => write!(f, "starts-with"),
            StringOperator::Contains => write!(f, "contains"),
            StringOperator::EndsWith => write!(f, "ends-with"),
        }
    }
}

/// Operators joining the children of [`Expression::Multiary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiaryOperator {
    /// All children must match.
    And,
    /// Any child must match.
    Or,
}

impl MultiaryOperator {
    /// The OData keyword.
    pub fn keyword(&self) -> &'static str {
        match self {
            MultiaryOperator::And => "and",
            MultiaryOperator::Or => "or",
        }
    }

    /// The SQL keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            MultiaryOperator::And => "AND",
            MultiaryOperator::Or => "OR",
        }
    }
}

/// A node of a search expression tree.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Scopes the inner expression to the index entries of one parameter.
    SearchParameter {
        param: Arc<SearchParameterInfo>,
        expression: Box<Expression>,
    },

    /// Compares a field with a literal.
    Binary {
        field: FieldName,
        operator: BinaryOperator,
        value: Literal,
        component_index: Option<usize>,
    },

    /// Matches a text field against a string operand.
    StringMatch {
        field: FieldName,
        operator: StringOperator,
        value: String,
        ignore_case: bool,
        component_index: Option<usize>,
    },

    /// Tests whether a field is absent (`is_missing`) or present.
    MissingField {
        field: FieldName,
        is_missing: bool,
        component_index: Option<usize>,
    },

    /// Joins child expressions with `and` / `or`.
    Multiary {
        operator: MultiaryOperator,
        expressions: Vec<Expression>,
    },

    /// Restricts results to resources referencing the given subject.
    Compartment {
        compartment_type: String,
        compartment_id: String,
    },

    /// Follows a reference parameter and applies the inner expression to the
    /// referenced (or, when `reversed`, referencing) resources.
    Chained {
        param: Arc<SearchParameterInfo>,
        target_resource_types: Vec<String>,
        reversed: bool,
        expression: Box<Expression>,
    },

    /// Requests referenced resources to be returned alongside matches.
    Include {
        param: Arc<SearchParameterInfo>,
        target_resource_type: Option<String>,
        reversed: bool,
        iterate: bool,
    },
}

impl Expression {
    /// Scopes `inner` to the parameter `param`.
    pub fn search_param(param: Arc<SearchParameterInfo>, inner: Expression) -> Self {
        Expression::SearchParameter {
            param,
            expression: Box::new(inner),
        }
    }

    /// Creates a binary comparison.
    pub fn binary(field: FieldName, operator: BinaryOperator, value: impl Into<Literal>) -> Self {
        Expression::Binary {
            field,
            operator,
            value: value.into(),
            component_index: None,
        }
    }

    /// Creates an equality comparison.
    pub fn eq(field: FieldName, value: impl Into<Literal>) -> Self {
        Self::binary(field, BinaryOperator::Equal, value)
    }

    /// Creates a string match.
    pub fn string_match(
        field: FieldName,
        operator: StringOperator,
        value: impl Into<String>,
        ignore_case: bool,
    ) -> Self {
        Expression::StringMatch {
            field,
            operator,
            value: value.into(),
            ignore_case,
            component_index: None,
        }
    }

    /// Creates a case-sensitive prefix match.
    pub fn starts_with(field: FieldName, value: impl Into<String>) -> Self {
        Self::string_match(field, StringOperator::StartsWith, value, false)
    }

    /// Creates a missing/present test.
    pub fn missing(field: FieldName, is_missing: bool) -> Self {
        Expression::MissingField {
            field,
            is_missing,
            component_index: None,
        }
    }

    /// Joins expressions with `and`.
    pub fn and(expressions: Vec<Expression>) -> Self {
        Expression::Multiary {
            operator: MultiaryOperator::And,
            expressions,
        }
    }

    /// Joins expressions with `or`.
    pub fn or(expressions: Vec<Expression>) -> Self {
        Expression::Multiary {
            operator: MultiaryOperator::Or,
            expressions,
        }
    }

    /// Creates a compartment restriction.
    pub fn compartment(
        compartment_type: impl Into<String>,
        compartment_id: impl Into<String>,
    ) -> Self {
        Expression::Compartment {
            compartment_type: compartment_type.into(),
            compartment_id: compartment_id.into(),
        }
    }

    /// Creates a forward chain through `param`.
    pub fn chained(
        param: Arc<SearchParameterInfo>,
        target_resource_types: Vec<String>,
        inner: Expression,
    ) -> Self {
        Expression::Chained {
            param,
            target_resource_types,
            reversed: false,
            expression: Box::new(inner),
        }
    }

    /// Creates an include directive.
    pub fn include(param: Arc<SearchParameterInfo>, target_resource_type: Option<String>) -> Self {
        Expression::Include {
            param,
            target_resource_type,
            reversed: false,
            iterate: false,
        }
    }

    /// Binds every leaf of this expression to composite component `index`.
    ///
    /// Parameter, chain and include nodes are left untouched.
    pub fn for_component(self, index: usize) -> Self {
        match self {
            Expression::Binary {
                field,
                operator,
                value,
                ..
            } => Expression::Binary {
                field,
                operator,
                value,
                component_index: Some(index),
            },
            Expression::StringMatch {
                field,
                operator,
                value,
                ignore_case,
                ..
            } => Expression::StringMatch {
                field,
                operator,
                value,
                ignore_case,
                component_index: Some(index),
            },
            Expression::MissingField {
                field, is_missing, ..
            } => Expression::MissingField {
                field,
                is_missing,
                component_index: Some(index),
            },
            Expression::Multiary {
                operator,
                expressions,
            } => Expression::Multiary {
                operator,
                expressions: expressions
                    .into_iter()
                    .map(|e| e.for_component(index))
                    .collect(),
            },
            other => other,
        }
    }

    /// Returns the component index of a leaf expression.
    pub fn component_index(&self) -> Option<usize> {
        match self {
            Expression::Binary {
                component_index, ..
            }
            | Expression::StringMatch {
                component_index, ..
            }
            | Expression::MissingField {
                component_index, ..
            } => *component_index,
            _ => None,
        }
    }

    /// Short name of the node kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expression::SearchParameter { .. } => "search parameter",
            Expression::Binary { .. } => "binary",
            Expression::StringMatch { .. } => "string match",
            Expression::MissingField { .. } => "missing field",
            Expression::Multiary { .. } => "multiary",
            Expression::Compartment { .. } => "compartment search",
            Expression::Chained { reversed: false, .. } => "chained search",
            Expression::Chained { reversed: true, .. } => "reverse chained search",
            Expression::Include { reversed: false, .. } => "include",
            Expression::Include { reversed: true, .. } => "revinclude",
        }
    }
}
