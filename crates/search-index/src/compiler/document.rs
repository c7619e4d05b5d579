//! Document-store compiler.
//!
//! Emits a SQL-like `WHERE` clause over documents aliased `r`, with search
//! values matched through `EXISTS` subqueries over the embedded
//! `searchIndices` array. Operands are bound as named `@pN` parameters.

use serde_json::Value;

use crate::error::{CompileResult, SearchError};
use crate::index::document::{
    PARAM_PROPERTY, SEARCH_INDICES_PROPERTY, literal_to_json, property_key,
};
use crate::types::{
    Expression, FieldName, MultiaryOperator, SearchParameterInfo, StringOperator,
    normalize_text,
};

use super::{Context, ExpressionCompiler, NativeField, presence_tests};

const BACKEND: &str = "document";

/// Alias of the document in compiled queries.
pub const DOCUMENT_ALIAS: &str = "r";

/// Alias of an index object inside `EXISTS` subqueries.
pub const INDEX_ALIAS: &str = "si";

/// A compiled document query condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    /// The `WHERE` condition.
    pub where_clause: String,
    /// Named parameters, in binding order.
    pub parameters: Vec<(String, Value)>,
}

impl DocumentFilter {
    /// Full query returning whole documents.
    pub fn query(&self) -> String {
        format!("SELECT VALUE r FROM root r WHERE {}", self.where_clause)
    }

    /// Query returning only the identity envelope of each document.
    pub fn identity_query(&self) -> String {
        format!(
            "SELECT r.id, r.resourceTypeName, r.resourceId, r.version, r.isHistory, r.lastModified FROM root r WHERE {}",
            self.where_clause
        )
    }

    /// Query counting matching documents.
    pub fn count_query(&self) -> String {
        format!("SELECT VALUE COUNT(1) FROM root r WHERE {}", self.where_clause)
    }

    /// Returns a bound parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Collects named parameters during one compilation.
#[derive(Debug, Default)]
struct Parameters(Vec<(String, Value)>);

impl Parameters {
    fn bind(&mut self, value: Value) -> String {
        let name = format!("@p{}", self.0.len());
        self.0.push((name.clone(), value));
        name
    }
}

/// Compiles expressions to document-store queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCompiler;

impl DocumentCompiler {
    /// Creates a compiler.
    pub fn new() -> Self {
        Self
    }

    fn visit(
        &self,
        expr: &Expression,
        ctx: &Context<'_>,
        params: &mut Parameters,
    ) -> CompileResult<String> {
        match expr {
            Expression::SearchParameter { param, expression } => {
                let inner_ctx = ctx.with_param(param);
                if inner_ctx.native.is_some() {
                    return self.visit(expression, &inner_ctx, params);
                }
                self.param_exists(param, expression, &inner_ctx, params)
            }

            Expression::Binary {
                field,
                operator,
                value,
                component_index,
            } => {
                let path = path(ctx, *field, *component_index)?;
                let name = params.bind(literal_to_json(value));
                Ok(format!("{} {} {}", path, operator.as_sql(), name))
            }

            Expression::StringMatch {
                field,
                operator,
                value,
                ignore_case,
                component_index,
            } => {
                let twin = field.normalized().filter(|_| ctx.native.is_none());
                let (path, operand, fold_in_query) = match (*ignore_case, twin) {
                    (true, Some(normalized)) => (
                        path(ctx, normalized, *component_index)?,
                        normalize_text(value),
                        false,
                    ),
                    (ignore, _) => (path(ctx, *field, *component_index)?, value.clone(), ignore),
                };
                let name = params.bind(Value::String(operand));
                let function = match operator {
                    StringOperator::Equals => "STRINGEQUALS",
                    StringOperator::StartsWith => "STARTSWITH",
                    StringOperator::Contains => "CONTAINS",
                    StringOperator::EndsWith => "ENDSWITH",
                };
                Ok(match (operator, fold_in_query) {
                    (StringOperator::Equals, false) => format!("{} = {}", path, name),
                    (_, false) => format!("{}({}, {})", function, path, name),
                    (_, true) => format!("{}({}, {}, true)", function, path, name),
                })
            }

            Expression::MissingField {
                field,
                is_missing,
                component_index,
            } => {
                let path = path(ctx, *field, *component_index)?;
                Ok(if *is_missing {
                    format!("NOT IS_DEFINED({})", path)
                } else {
                    format!("IS_DEFINED({})", path)
                })
            }

            Expression::Multiary {
                operator,
                expressions,
            } => {
                if expressions.is_empty() {
                    return Err(SearchError::InvalidExpression {
                        message: "multiary expression without operands".to_string(),
                    });
                }
                let inner = ctx.with_multiary(*operator);
                let parts = expressions
                    .iter()
                    .map(|e| self.visit(e, &inner, params))
                    .collect::<CompileResult<Vec<_>>>()?;
                let joined = parts.join(&format!(" {} ", operator.as_sql()));
                Ok(if ctx.continues(*operator) || parts.len() == 1 {
                    joined
                } else {
                    format!("({})", joined)
                })
            }

            Expression::Compartment {
                compartment_type,
                compartment_id,
            } => {
                let rtype = params.bind(Value::String(compartment_type.clone()));
                let rid = params.bind(Value::String(compartment_id.clone()));
                Ok(format!(
                    "EXISTS(SELECT VALUE {si} FROM {si} IN {r}.{indices} WHERE {si}.{rtype_key} = {rtype} AND {si}.{rid_key} = {rid})",
                    si = INDEX_ALIAS,
                    r = ctx.resource_alias,
                    indices = SEARCH_INDICES_PROPERTY,
                    rtype_key = FieldName::ReferenceResourceType.subfield(),
                    rid_key = FieldName::ReferenceResourceId.subfield(),
                ))
            }

            Expression::Chained { .. } | Expression::Include { .. } => {
                Err(SearchError::not_supported(expr.kind_name(), BACKEND))
            }
        }
    }

    fn param_exists(
        &self,
        param: &SearchParameterInfo,
        inner: &Expression,
        ctx: &Context<'_>,
        params: &mut Parameters,
    ) -> CompileResult<String> {
        if let Some((operator, tests)) = presence_tests(inner, BACKEND)? {
            let mut parts = Vec::with_capacity(tests.len());
            for test in &tests {
                let key = property_key(test.field, test.component_index);
                let present = format!(
                    "{} AND IS_DEFINED({}.{}))",
                    index_head(param, ctx, params),
                    INDEX_ALIAS,
                    key
                );
                parts.push(if test.is_missing {
                    format!("NOT {}", present)
                } else {
                    present
                });
            }
            return Ok(match parts.as_slice() {
                [single] => single.clone(),
                _ => format!("({})", parts.join(&format!(" {} ", operator.as_sql()))),
            });
        }

        let head = index_head(param, ctx, params);
        let body = self.visit(inner, &ctx.with_index_alias(INDEX_ALIAS.to_string()), params)?;
        Ok(format!("{} AND {})", head, body))
    }
}

/// Opens an `EXISTS` over the index objects of one parameter.
fn index_head(param: &SearchParameterInfo, ctx: &Context<'_>, params: &mut Parameters) -> String {
    let name = params.bind(Value::String(param.name.clone()));
    format!(
        "EXISTS(SELECT VALUE {si} FROM {si} IN {r}.{indices} WHERE {si}.{p} = {name}",
        si = INDEX_ALIAS,
        r = ctx.resource_alias,
        indices = SEARCH_INDICES_PROPERTY,
        p = PARAM_PROPERTY,
    )
}

fn path(ctx: &Context<'_>, field: FieldName, component: Option<usize>) -> CompileResult<String> {
    if let Some(native) = ctx.native {
        let property = match native {
            NativeField::ResourceType => "resourceTypeName",
            NativeField::Id => "resourceId",
            NativeField::LastUpdated => "lastModified",
        };
        return Ok(format!("{}.{}", ctx.resource_alias, property));
    }
    let alias = ctx
        .index_alias
        .as_deref()
        .ok_or_else(|| SearchError::InvalidExpression {
            message: format!("field '{}' used outside a search parameter", field),
        })?;
    Ok(format!("{}.{}", alias, property_key(field, component)))
}

impl ExpressionCompiler for DocumentCompiler {
    type Filter = DocumentFilter;

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn compile(
        &self,
        resource_type: &str,
        expression: Option<&Expression>,
        history: bool,
    ) -> CompileResult<DocumentFilter> {
        let r = DOCUMENT_ALIAS;
        let mut params = Parameters::default();
        let type_param = params.bind(Value::String(resource_type.to_string()));
        let mut clauses = vec![format!("{}.resourceTypeName = {}", r, type_param)];
        if !history {
            clauses.push(format!("{}.isHistory = false", r));
        }
        if let Some(expression) = expression {
            let ctx = Context::root(resource_type, history, r).with_multiary(MultiaryOperator::And);
            clauses.push(self.visit(expression, &ctx, &mut params)?);
        }
        Ok(DocumentFilter {
            where_clause: clauses.join(" AND "),
            parameters: params.0,
        })
    }
}
