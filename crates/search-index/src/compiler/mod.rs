//! Expression compilers.
//!
//! Each backend walks the closed [`Expression`] enum and emits its native
//! filter. The walk threads an immutable [`Context`]; every recursion step
//! derives a new context instead of mutating a shared one.
//!
//! | Expression | Document | Relational | Wide-column |
//! |------------|----------|------------|-------------|
//! | Compartment | yes | yes | no |
//! | Chained | no | forward only | no |
//! | Include | no | no | no |
//! | Contains / EndsWith | yes | yes | no |
//! | Missing mixed with comparisons | no | no | no |
//!
//! A missing test is answered for the whole parameter: `missing = true`
//! matches when no value of the parameter carries the field.
//!
//! Unsupported nodes raise [`SearchError::NotSupported`](crate::error::SearchError::NotSupported).

pub mod document;
pub mod relational;
pub mod table;

pub use document::{DocumentCompiler, DocumentFilter};
pub use relational::{RelationalCompiler, SqlFragment, SqlParam};
pub use table::{TableCompiler, TableFilter};

use std::fmt::Debug;

use crate::error::{CompileResult, SearchError};
use crate::types::{
    Expression, FieldName, ID_PARAM, LAST_UPDATED_PARAM, MultiaryOperator, RESOURCE_TYPE_PARAM,
    SearchParameterInfo,
};

/// Compiles expressions into a backend-native filter.
pub trait ExpressionCompiler: Send + Sync {
    /// The compiled filter.
    type Filter: Clone + Debug + Send + Sync;

    /// Backend name used in error messages.
    fn backend_name(&self) -> &'static str;

    /// Compiles `expression` for a search over `resource_type`.
    ///
    /// `None` yields the type-only filter. With `history` the filter also
    /// matches superseded versions.
    fn compile(
        &self,
        resource_type: &str,
        expression: Option<&Expression>,
        history: bool,
    ) -> CompileResult<Self::Filter>;
}

/// Storage fields that search parameters may bind to directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeField {
    /// `_type`
    ResourceType,
    /// `_id`
    Id,
    /// `_lastUpdated`
    LastUpdated,
}

impl NativeField {
    /// Returns the native field a parameter binds to, if any.
    pub fn for_param(param: &SearchParameterInfo) -> Option<Self> {
        match param.name.as_str() {
            RESOURCE_TYPE_PARAM => Some(NativeField::ResourceType),
            ID_PARAM => Some(NativeField::Id),
            LAST_UPDATED_PARAM => Some(NativeField::LastUpdated),
            _ => None,
        }
    }
}

/// Compilation state threaded through the walk.
#[derive(Debug, Clone)]
pub struct Context<'a> {
    /// The searched resource type.
    pub resource_type: &'a str,
    /// Whether superseded versions are visible.
    pub history: bool,
    /// The enclosing search parameter.
    pub param: Option<&'a SearchParameterInfo>,
    /// Native field override for `_type`, `_id` and `_lastUpdated`.
    pub native: Option<NativeField>,
    /// Wide-column slot of the enclosing parameter.
    pub slot: Option<usize>,
    /// Operator of the enclosing multiary node.
    pub multiary: Option<MultiaryOperator>,
    /// Alias of the resource row or document being filtered.
    pub resource_alias: String,
    /// Alias of the index row or object leaves refer to.
    pub index_alias: Option<String>,
}

impl<'a> Context<'a> {
    /// Creates the root context.
    pub fn root(resource_type: &'a str, history: bool, resource_alias: &str) -> Self {
        Self {
            resource_type,
            history,
            param: None,
            native: None,
            slot: None,
            multiary: None,
            resource_alias: resource_alias.to_string(),
            index_alias: None,
        }
    }

    /// Enters a search parameter.
    pub fn with_param(&self, param: &'a SearchParameterInfo) -> Self {
        Self {
            param: Some(param),
            native: NativeField::for_param(param),
            multiary: None,
            ..self.clone()
        }
    }

    /// Pins a wide-column slot.
    pub fn with_slot(&self, slot: usize) -> Self {
        Self {
            slot: Some(slot),
            ..self.clone()
        }
    }

    /// Enters a multiary node.
    pub fn with_multiary(&self, operator: MultiaryOperator) -> Self {
        Self {
            multiary: Some(operator),
            ..self.clone()
        }
    }

    /// Switches to another resource alias (for chained searches).
    pub fn with_resource_alias(&self, alias: String) -> Self {
        Self {
            resource_alias: alias,
            index_alias: None,
            param: None,
            native: None,
            multiary: None,
            ..self.clone()
        }
    }

    /// Sets the alias leaves refer to.
    pub fn with_index_alias(&self, alias: String) -> Self {
        Self {
            index_alias: Some(alias),
            ..self.clone()
        }
    }

    /// Returns true when a child joined by `operator` needs no parentheses.
    pub fn continues(&self, operator: MultiaryOperator) -> bool {
        self.multiary == Some(operator)
    }
}

/// A missing-field test answered for the whole parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PresenceTest {
    pub field: FieldName,
    pub component_index: Option<usize>,
    pub is_missing: bool,
}

/// Extracts the presence tests of a parameter's expression.
///
/// A missing test asks whether any value of the parameter carries the field,
/// so `missing = true` holds only when no value does. Such tests must be the
/// parameter's direct child, or the operands of a single multiary child.
/// Returns `None` when the expression holds no missing tests. Missing tests
/// mixed with value comparisons are rejected.
pub(crate) fn presence_tests(
    expr: &Expression,
    backend: &str,
) -> CompileResult<Option<(MultiaryOperator, Vec<PresenceTest>)>> {
    let tests = match expr {
        Expression::MissingField { .. } => {
            presence_test(expr).map(|test| (MultiaryOperator::And, vec![test]))
        }
        Expression::Multiary {
            operator,
            expressions,
        } if !expressions.is_empty() => expressions
            .iter()
            .map(presence_test)
            .collect::<Option<Vec<_>>>()
            .map(|tests| (*operator, tests)),
        _ => None,
    };
    if tests.is_none() && contains_missing(expr) {
        return Err(SearchError::not_supported(
            "missing test combined with value comparisons",
            backend,
        ));
    }
    Ok(tests)
}

fn presence_test(expr: &Expression) -> Option<PresenceTest> {
    match expr {
        Expression::MissingField {
            field,
            is_missing,
            component_index,
        } => Some(PresenceTest {
            field: *field,
            component_index: *component_index,
            is_missing: *is_missing,
        }),
        _ => None,
    }
}

fn contains_missing(expr: &Expression) -> bool {
    match expr {
        Expression::MissingField { .. } => true,
        Expression::Multiary { expressions, .. } => expressions.iter().any(contains_missing),
        _ => false,
    }
}
