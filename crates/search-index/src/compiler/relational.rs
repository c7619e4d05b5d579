//! Relational (SQL) compiler.
//!
//! The compiled filter is a `WHERE` condition over the `resource` table
//! aliased as `r`. Each search parameter becomes an `EXISTS` subquery against
//! the per-kind table holding its values; composite parameters join one
//! aliased table per component on the shared composite instance id.

use std::collections::BTreeMap;

use crate::error::{CompileResult, SearchError};
use crate::index::relational::{IdResolver, RowKind, column_for};
use crate::types::{
    Expression, FieldName, Literal, MultiaryOperator, SearchParameterInfo, StringOperator,
    format_timestamp, normalize_text,
};

use super::{Context, ExpressionCompiler, NativeField, presence_tests};

const BACKEND: &str = "relational";

/// Alias of the resource table in compiled filters.
pub const RESOURCE_ALIAS: &str = "r";

/// A SQL fragment with bound parameters.
///
/// Placeholders are positional (`?`); parameters are kept in textual order so
/// fragments can be concatenated freely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
    /// Null parameter.
    Null,
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Creates an integer parameter.
    pub fn integer(i: i64) -> Self {
        SqlParam::Integer(i)
    }

    /// Converts a literal to its stored column form.
    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::String(s) => SqlParam::String(s.clone()),
            Literal::Integer(i) => SqlParam::Integer(*i),
            Literal::Decimal(d) => SqlParam::Float(Literal::decimal_as_f64(d)),
            Literal::Boolean(b) => SqlParam::Integer(i64::from(*b)),
            Literal::DateTime(dt) => SqlParam::String(format_timestamp(dt)),
        }
    }
}

impl SqlFragment {
    /// Creates a new SQL fragment.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Combines with another fragment using AND.
    pub fn and(mut self, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("{} AND {}", self.sql, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Returns true if this fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Compiles expressions to SQL conditions.
pub struct RelationalCompiler<R: IdResolver> {
    resolver: R,
}

impl<R: IdResolver> RelationalCompiler<R> {
    /// Creates a compiler resolving ids through `resolver`.
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    fn resource_type_id(&self, resource_type: &str) -> CompileResult<i16> {
        self.resolver
            .resource_type_id(resource_type)
            .map_err(|e| SearchError::InvalidExpression {
                message: e.to_string(),
            })
    }

    fn visit(&self, expr: &Expression, ctx: &Context<'_>) -> CompileResult<SqlFragment> {
        match expr {
            Expression::SearchParameter { param, expression } => {
                let inner_ctx = ctx.with_param(param);
                if inner_ctx.native.is_some() {
                    return self.visit(expression, &inner_ctx);
                }
                self.param_exists(param, expression, &inner_ctx)
            }

            Expression::Binary {
                field,
                operator,
                value,
                component_index,
            } => {
                if ctx.native == Some(NativeField::ResourceType) {
                    let id = match value {
                        Literal::String(name) => self.resource_type_id(name)?,
                        other => {
                            return Err(SearchError::InvalidExpression {
                                message: format!("_type expects a string, found {}", other),
                            });
                        }
                    };
                    return Ok(SqlFragment::with_params(
                        format!("{}.resource_type_id {} ?", ctx.resource_alias, operator.as_sql()),
                        vec![SqlParam::integer(i64::from(id))],
                    ));
                }
                let column = column_ref(ctx, *field, *component_index)?;
                Ok(SqlFragment::with_params(
                    format!("{} {} ?", column, operator.as_sql()),
                    vec![SqlParam::from_literal(value)],
                ))
            }

            Expression::StringMatch {
                field,
                operator,
                value,
                ignore_case,
                component_index,
            } => {
                let (column, operand) = match (*ignore_case, field.normalized()) {
                    (true, Some(normalized)) if ctx.native.is_none() => (
                        column_ref(ctx, normalized, *component_index)?,
                        normalize_text(value),
                    ),
                    (true, _) => (
                        format!("lower({})", column_ref(ctx, *field, *component_index)?),
                        value.to_lowercase(),
                    ),
                    (false, _) => (column_ref(ctx, *field, *component_index)?, value.clone()),
                };
                Ok(string_match(&column, *operator, operand))
            }

            Expression::MissingField {
                field,
                is_missing,
                component_index,
            } => {
                let column = column_ref(ctx, *field, *component_index)?;
                let test = if *is_missing { "IS NULL" } else { "IS NOT NULL" };
                Ok(SqlFragment::new(format!("{} {}", column, test)))
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
                let mut parts = Vec::with_capacity(expressions.len());
                let mut params = Vec::new();
                for e in expressions {
                    let fragment = self.visit(e, &inner)?;
                    parts.push(fragment.sql);
                    params.extend(fragment.params);
                }
                let joined = parts.join(&format!(" {} ", operator.as_sql()));
                let sql = if ctx.continues(*operator) || parts.len() == 1 {
                    joined
                } else {
                    format!("({})", joined)
                };
                Ok(SqlFragment::with_params(sql, params))
            }

            Expression::Compartment {
                compartment_type,
                compartment_id,
            } => {
                let r = &ctx.resource_alias;
                let alias = format!("{}_cmp", r);
                Ok(SqlFragment::with_params(
                    format!(
                        "EXISTS (SELECT 1 FROM {table} {a} WHERE {a}.resource_surrogate_id = {r}.resource_surrogate_id AND {a}.reference_resource_type = ? AND {a}.reference_resource_id = ?)",
                        table = RowKind::Reference.table_name(),
                        a = alias,
                        r = r,
                    ),
                    vec![
                        SqlParam::string(compartment_type),
                        SqlParam::string(compartment_id),
                    ],
                ))
            }

            Expression::Chained {
                param,
                target_resource_types,
                reversed: false,
                expression,
            } => self.forward_chain(param, target_resource_types, expression, ctx),

            Expression::Chained { reversed: true, .. } | Expression::Include { .. } => {
                Err(SearchError::not_supported(expr.kind_name(), BACKEND))
            }
        }
    }

    /// `[NOT] EXISTS` over the value table(s) of one parameter.
    fn param_exists(
        &self,
        param: &SearchParameterInfo,
        inner: &Expression,
        ctx: &Context<'_>,
    ) -> CompileResult<SqlFragment> {
        let search_param_id = self
            .resolver
            .search_param_id(&param.url)
            .map_err(|e| SearchError::InvalidExpression {
                message: e.to_string(),
            })?;
        let r = &ctx.resource_alias;

        if let Some((operator, tests)) = presence_tests(inner, BACKEND)? {
            let alias = format!("{}_x", r);
            let mut parts = Vec::with_capacity(tests.len());
            let mut params = Vec::with_capacity(tests.len());
            for test in &tests {
                let (kind, column) = column_for(test.field);
                let component = test
                    .component_index
                    .map(|i| format!(" AND {}.component_index = {}", alias, i))
                    .unwrap_or_default();
                let negate = if test.is_missing { "NOT " } else { "" };
                parts.push(format!(
                    "{negate}EXISTS (SELECT 1 FROM {table} {a} WHERE {a}.resource_surrogate_id = {r}.resource_surrogate_id AND {a}.search_param_id = ?{component} AND {a}.{column} IS NOT NULL)",
                    table = kind.table_name(),
                    a = alias,
                ));
                params.push(SqlParam::integer(i64::from(search_param_id)));
            }
            let sql = match parts.as_slice() {
                [single] => single.clone(),
                _ => format!("({})", parts.join(&format!(" {} ", operator.as_sql()))),
            };
            return Ok(SqlFragment::with_params(sql, params));
        }

        let mut kinds = Vec::new();
        collect_kinds(inner, &mut kinds);

        if param.is_composite() {
            return self.composite_exists(search_param_id, inner, &kinds, ctx);
        }

        let mut distinct: Vec<RowKind> = kinds.iter().map(|(_, kind)| *kind).collect();
        distinct.sort_by_key(|kind| kind.table_name());
        distinct.dedup();
        match distinct.as_slice() {
            [kind] => {
                let alias = format!("{}_x", r);
                let body = self.visit(inner, &ctx.with_index_alias(alias.clone()))?;
                let mut params = vec![SqlParam::integer(i64::from(search_param_id))];
                params.extend(body.params);
                Ok(SqlFragment::with_params(
                    format!(
                        "EXISTS (SELECT 1 FROM {table} {a} WHERE {a}.resource_surrogate_id = {r}.resource_surrogate_id AND {a}.search_param_id = ? AND {body})",
                        table = kind.table_name(),
                        a = alias,
                        body = body.sql,
                    ),
                    params,
                ))
            }
            [] => Err(SearchError::InvalidExpression {
                message: format!("parameter '{}' has no field comparisons", param.name),
            }),
            _ => match inner {
                // Values of different kinds live in different tables; split an
                // OR into one EXISTS per branch.
                Expression::Multiary {
                    operator: MultiaryOperator::Or,
                    expressions,
                } => {
                    let mut parts = Vec::new();
                    let mut params = Vec::new();
                    for child in expressions {
                        let fragment = self.param_exists(param, child, ctx)?;
                        parts.push(fragment.sql);
                        params.extend(fragment.params);
                    }
                    Ok(SqlFragment::with_params(
                        format!("({})", parts.join(" OR ")),
                        params,
                    ))
                }
                _ => Err(SearchError::InvalidExpression {
                    message: format!(
                        "parameter '{}' combines fields stored in different tables",
                        param.name
                    ),
                }),
            },
        }
    }

    fn composite_exists(
        &self,
        search_param_id: i16,
        inner: &Expression,
        kinds: &[(Option<usize>, RowKind)],
        ctx: &Context<'_>,
    ) -> CompileResult<SqlFragment> {
        let r = &ctx.resource_alias;
        let mut components: BTreeMap<usize, RowKind> = BTreeMap::new();
        for &(component, kind) in kinds {
            let Some(index) = component else {
                return Err(SearchError::InvalidExpression {
                    message: "composite comparison without a component index".to_string(),
                });
            };
            if components.insert(index, kind).is_some_and(|previous| previous != kind) {
                return Err(SearchError::InvalidExpression {
                    message: format!("component {} mixes fields of different kinds", index),
                });
            }
        }
        let components: Vec<(usize, RowKind)> = components.into_iter().collect();
        let Some(&(first, first_kind)) = components.first() else {
            return Err(SearchError::InvalidExpression {
                message: "composite parameter has no field comparisons".to_string(),
            });
        };

        let lead = component_alias(r, first);
        let mut from = format!("{} {}", first_kind.table_name(), lead);
        for &(index, kind) in components.iter().skip(1) {
            let a = component_alias(r, index);
            from.push_str(&format!(
                " JOIN {table} {a} ON {a}.resource_surrogate_id = {lead}.resource_surrogate_id AND {a}.search_param_id = {lead}.search_param_id AND {a}.composite_instance_id = {lead}.composite_instance_id AND {a}.component_index = {index}",
                table = kind.table_name(),
            ));
        }

        let body = self.visit(inner, ctx)?;
        let mut params = vec![SqlParam::integer(i64::from(search_param_id))];
        params.extend(body.params);
        Ok(SqlFragment::with_params(
            format!(
                "EXISTS (SELECT 1 FROM {from} WHERE {lead}.resource_surrogate_id = {r}.resource_surrogate_id AND {lead}.search_param_id = ? AND {lead}.component_index = {first} AND {body})",
                body = body.sql,
            ),
            params,
        ))
    }

    fn forward_chain(
        &self,
        param: &SearchParameterInfo,
        target_resource_types: &[String],
        inner: &Expression,
        ctx: &Context<'_>,
    ) -> CompileResult<SqlFragment> {
        if target_resource_types.is_empty() {
            return Err(SearchError::InvalidExpression {
                message: format!("chained parameter '{}' has no target types", param.name),
            });
        }
        let search_param_id = self
            .resolver
            .search_param_id(&param.url)
            .map_err(|e| SearchError::InvalidExpression {
                message: e.to_string(),
            })?;

        let r = &ctx.resource_alias;
        let reference = format!("{}_ref", r);
        let target = format!("{}_t", r);

        let mut params = vec![SqlParam::integer(i64::from(search_param_id))];
        let mut targets = Vec::new();
        for resource_type in target_resource_types {
            // A type without an id has no stored resources to match.
            let Ok(id) = self.resolver.resource_type_id(resource_type) else {
                continue;
            };
            targets.push(format!(
                "({reference}.reference_resource_type = ? AND {target}.resource_type_id = ?)"
            ));
            params.push(SqlParam::string(resource_type));
            params.push(SqlParam::integer(i64::from(id)));
        }
        if targets.is_empty() {
            return Ok(SqlFragment::new("1 = 0"));
        }

        let body = self.visit(inner, &ctx.with_resource_alias(target.clone()))?;
        params.extend(body.params);

        Ok(SqlFragment::with_params(
            format!(
                "EXISTS (SELECT 1 FROM {refs} {reference} JOIN resource {target} ON {target}.resource_id = {reference}.reference_resource_id AND {target}.is_history = 0 WHERE {reference}.resource_surrogate_id = {r}.resource_surrogate_id AND {reference}.search_param_id = ? AND ({targets}) AND {body})",
                refs = RowKind::Reference.table_name(),
                targets = targets.join(" OR "),
                body = body.sql,
            ),
            params,
        ))
    }
}

fn component_alias(resource_alias: &str, index: usize) -> String {
    format!("{}_c{}", resource_alias, index)
}

fn column_ref(
    ctx: &Context<'_>,
    field: FieldName,
    component: Option<usize>,
) -> CompileResult<String> {
    if let Some(native) = ctx.native {
        let column = match native {
            NativeField::ResourceType => "resource_type_id",
            NativeField::Id => "resource_id",
            NativeField::LastUpdated => "last_updated",
        };
        return Ok(format!("{}.{}", ctx.resource_alias, column));
    }

    let (_, column) = column_for(field);
    let alias = match component {
        Some(i) => component_alias(&ctx.resource_alias, i),
        None => ctx.index_alias.clone().ok_or_else(|| SearchError::InvalidExpression {
            message: format!("field '{}' used outside a search parameter", field),
        })?,
    };
    Ok(format!("{}.{}", alias, column))
}

fn string_match(column: &str, operator: StringOperator, value: String) -> SqlFragment {
    match operator {
        StringOperator::Equals => {
            SqlFragment::with_params(format!("{} = ?", column), vec![SqlParam::String(value)])
        }
        StringOperator::StartsWith => SqlFragment::with_params(
            format!("instr({}, ?) = 1", column),
            vec![SqlParam::String(value)],
        ),
        StringOperator::Contains => SqlFragment::with_params(
            format!("instr({}, ?) > 0", column),
            vec![SqlParam::String(value)],
        ),
        StringOperator::EndsWith if value.is_empty() => {
            SqlFragment::new(format!("{} IS NOT NULL", column))
        }
        StringOperator::EndsWith => SqlFragment::with_params(
            format!("substr({}, -length(?)) = ?", column),
            vec![SqlParam::String(value.clone()), SqlParam::String(value)],
        ),
    }
}

/// Records the table each leaf reads from, keyed by component.
fn collect_kinds(expr: &Expression, kinds: &mut Vec<(Option<usize>, RowKind)>) {
    match expr {
        Expression::Binary {
            field,
            component_index,
            ..
        }
        | Expression::StringMatch {
            field,
            component_index,
            ..
        }
        | Expression::MissingField {
            field,
            component_index,
            ..
        } => kinds.push((*component_index, column_for(*field).0)),
        Expression::Multiary { expressions, .. } => {
            expressions.iter().for_each(|e| collect_kinds(e, kinds))
        }
        _ => {}
    }
}

impl<R: IdResolver> ExpressionCompiler for RelationalCompiler<R> {
    type Filter = SqlFragment;

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn compile(
        &self,
        resource_type: &str,
        expression: Option<&Expression>,
        history: bool,
    ) -> CompileResult<SqlFragment> {
        let r = RESOURCE_ALIAS;
        let type_id = self.resource_type_id(resource_type)?;
        let mut filter = SqlFragment::with_params(
            format!("{}.resource_type_id = ?", r),
            vec![SqlParam::integer(i64::from(type_id))],
        );
        if !history {
            filter = filter.and(SqlFragment::new(format!("{}.is_history = 0", r)));
        }
        if let Some(expression) = expression {
            let ctx = Context::root(resource_type, history, r).with_multiary(MultiaryOperator::And);
            filter = filter.and(self.visit(expression, &ctx)?);
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::relational::StaticIdResolver;
    use crate::types::{BinaryOperator, ID_PARAM, SearchParamType};
    use rust_decimal::Decimal;

    fn compiler() -> RelationalCompiler<StaticIdResolver> {
        let resolver = StaticIdResolver::new();
        resolver.register_resource_type("Patient").unwrap();
        resolver.register_resource_type("Observation").unwrap();
        resolver.register_search_param("http://example.org/name").unwrap();
        resolver.register_search_param("http://example.org/code-value-quantity").unwrap();
        resolver.register_search_param("http://example.org/subject").unwrap();
        RelationalCompiler::new(resolver)
    }

    #[test]
    fn test_type_only_filter() {
        let filter = compiler().compile("Observation", None, false).unwrap();
        assert_eq!(filter.sql, "r.resource_type_id = ? AND r.is_history = 0");
        assert_eq!(filter.params, vec![SqlParam::Integer(2)]);

        let history = compiler().compile("Observation", None, true).unwrap();
        assert_eq!(history.sql, "r.resource_type_id = ?");
    }

    #[test]
    fn test_string_parameter_exists() {
        let name =
            SearchParameterInfo::new("name", "http://example.org/name", SearchParamType::String)
                .shared();
        let expr = Expression::search_param(
            name,
            Expression::string_match(FieldName::String, StringOperator::StartsWith, "Sm", true),
        );
        let filter = compiler().compile("Patient", Some(&expr), false).unwrap();
        assert!(filter.sql.contains(
            "EXISTS (SELECT 1 FROM string_search_param r_x WHERE r_x.resource_surrogate_id = r.resource_surrogate_id AND r_x.search_param_id = ? AND instr(r_x.text_normalized, ?) = 1)"
        ));
        assert_eq!(
            filter.params,
            vec![SqlParam::Integer(1), SqlParam::Integer(1), SqlParam::string("sm")]
        );
    }

    #[test]
    fn test_composite_joins_components() {
        let param = SearchParameterInfo::composite(
            "code-value-quantity",
            "http://example.org/code-value-quantity",
            vec![SearchParamType::Token, SearchParamType::Quantity],
        )
        .shared();
        let expr = Expression::search_param(
            param,
            Expression::and(vec![
                Expression::eq(FieldName::TokenCode, "8480-6").for_component(0),
                Expression::binary(
                    FieldName::QuantityLow,
                    BinaryOperator::GreaterThan,
                    Decimal::from(100),
                )
                .for_component(1),
            ]),
        );
        let filter = compiler().compile("Observation", Some(&expr), false).unwrap();
        assert!(
            filter
                .sql
                .contains("FROM token_search_param r_c0 JOIN quantity_search_param r_c1 ON")
        );
        assert!(filter.sql.contains("r_c1.composite_instance_id = r_c0.composite_instance_id"));
        assert!(filter.sql.contains("r_c0.code = ? AND r_c1.low_value > ?"));
        assert_eq!(filter.params.last(), Some(&SqlParam::Float(100.0)));
    }

    #[test]
    fn test_native_fields() {
        let id = SearchParameterInfo::new(ID_PARAM, "", SearchParamType::Token).shared();
        let expr = Expression::search_param(id, Expression::eq(FieldName::TokenCode, "p1"));
        let filter = compiler().compile("Patient", Some(&expr), false).unwrap();
        assert!(filter.sql.ends_with("r.resource_id = ?"));
    }

    #[test]
    fn test_chain_and_capabilities() {
        let subject = SearchParameterInfo::new(
            "subject",
            "http://example.org/subject",
            SearchParamType::Reference,
        )
        .shared();
        let name =
            SearchParameterInfo::new("name", "http://example.org/name", SearchParamType::String)
                .shared();
        let chained = Expression::chained(
            subject.clone(),
            vec!["Patient".to_string()],
            Expression::search_param(name, Expression::eq(FieldName::String, "Smith")),
        );
        let filter = compiler().compile("Observation", Some(&chained), false).unwrap();
        assert!(
            filter
                .sql
                .contains("JOIN resource r_t ON r_t.resource_id = r_ref.reference_resource_id")
        );
        assert!(filter.sql.contains("FROM string_search_param r_t_x"));

        let Expression::Chained { param, target_resource_types, expression, .. } = chained else {
            unreachable!()
        };
        let reversed = Expression::Chained {
            param,
            target_resource_types,
            reversed: true,
            expression,
        };
        assert!(compiler()
            .compile("Patient", Some(&reversed), false)
            .unwrap_err()
            .is_not_supported());

        let include = Expression::include(subject, Some("Patient".into()));
        assert!(compiler()
            .compile("Observation", Some(&include), false)
            .unwrap_err()
            .is_not_supported());
    }

    #[test]
    fn test_missing_parameter() {
        let name =
            SearchParameterInfo::new("name", "http://example.org/name", SearchParamType::String)
                .shared();
        let expr = Expression::search_param(name, Expression::missing(FieldName::String, true));
        let filter = compiler().compile("Patient", Some(&expr), false).unwrap();
        assert!(filter.sql.ends_with(
            "NOT EXISTS (SELECT 1 FROM string_search_param r_x WHERE r_x.resource_surrogate_id = r.resource_surrogate_id AND r_x.search_param_id = ? AND r_x.text IS NOT NULL)"
        ));
    }

    #[test]
    fn test_component_missing_is_parameter_level() {
        let param = SearchParameterInfo::composite(
            "code-value-quantity",
            "http://example.org/code-value-quantity",
            vec![SearchParamType::Token, SearchParamType::Quantity],
        )
        .shared();
        let expr = Expression::search_param(
            param.clone(),
            Expression::missing(FieldName::TokenCode, true).for_component(0),
        );
        let filter = compiler().compile("Observation", Some(&expr), false).unwrap();
        assert!(filter.sql.ends_with(
            "NOT EXISTS (SELECT 1 FROM token_search_param r_x WHERE r_x.resource_surrogate_id = r.resource_surrogate_id AND r_x.search_param_id = ? AND r_x.component_index = 0 AND r_x.code IS NOT NULL)"
        ));
        assert_eq!(filter.params, vec![SqlParam::Integer(2), SqlParam::Integer(2)]);

        let mixed = Expression::search_param(
            param,
            Expression::and(vec![
                Expression::eq(FieldName::TokenCode, "8480-6").for_component(0),
                Expression::missing(FieldName::QuantityLow, true).for_component(1),
            ]),
        );
        assert!(compiler()
            .compile("Observation", Some(&mixed), false)
            .unwrap_err()
            .is_not_supported());
    }
}
