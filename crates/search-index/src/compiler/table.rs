//! Wide-column (OData) compiler.
//!
//! Filters are built as a [`TableFilter`] tree, which renders to an OData
//! `$filter` string and can also be evaluated directly against a
//! [`TableEntity`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::SearchIndexConfig;
use crate::error::{CompileResult, SearchError};
use crate::index::table::{HISTORY_ROW_KEY_SEPARATOR, TableEntity, property_name};
use crate::types::{
    BinaryOperator, Expression, FieldName, Literal, MultiaryOperator, SearchParamType,
    StringOperator, format_timestamp, normalize_text,
};

use super::{Context, ExpressionCompiler, NativeField, PresenceTest, presence_tests};

const BACKEND: &str = "table";

/// Partition key system property.
pub const PARTITION_KEY: &str = "PartitionKey";
/// Row key system property.
pub const ROW_KEY: &str = "RowKey";
/// Modification time system property.
pub const TIMESTAMP: &str = "Timestamp";

/// A wide-column filter.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFilter {
    /// `property op value`
    Compare {
        /// Property name.
        property: String,
        /// Operator.
        operator: BinaryOperator,
        /// Operand.
        value: Literal,
    },
    /// True when the property is present.
    Exists {
        /// Property name.
        property: String,
        /// The field stored under the property, which fixes its type.
        field: FieldName,
    },
    /// Negation.
    Not(Box<TableFilter>),
    /// Conjunction.
    And(Vec<TableFilter>),
    /// Disjunction.
    Or(Vec<TableFilter>),
}

impl TableFilter {
    fn compare(property: impl Into<String>, operator: BinaryOperator, value: Literal) -> Self {
        TableFilter::Compare {
            property: property.into(),
            operator,
            value,
        }
    }

    fn not(inner: TableFilter) -> Self {
        TableFilter::Not(Box::new(inner))
    }

    fn join(operator: MultiaryOperator, mut filters: Vec<TableFilter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        match operator {
            MultiaryOperator::And => TableFilter::And(filters),
            MultiaryOperator::Or => TableFilter::Or(filters),
        }
    }

    /// Evaluates the filter against an entity.
    ///
    /// Comparisons against an absent property are false, including `ne`.
    pub fn evaluate(&self, entity: &TableEntity) -> bool {
        match self {
            TableFilter::Compare {
                property,
                operator,
                value,
            } => {
                let Some(actual) = entity_value(entity, property) else {
                    return false;
                };
                let Some(ordering) = actual.compare(value) else {
                    return false;
                };
                match operator {
                    BinaryOperator::Equal => ordering == Ordering::Equal,
                    BinaryOperator::NotEqual => ordering != Ordering::Equal,
                    BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                    BinaryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
                    BinaryOperator::LessThan => ordering == Ordering::Less,
                    BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
                }
            }
            TableFilter::Exists { property, .. } => entity_value(entity, property).is_some(),
            TableFilter::Not(inner) => !inner.evaluate(entity),
            TableFilter::And(filters) => filters.iter().all(|f| f.evaluate(entity)),
            TableFilter::Or(filters) => filters.iter().any(|f| f.evaluate(entity)),
        }
    }

    /// Renders the OData `$filter` string.
    pub fn to_odata(&self) -> String {
        self.to_string()
    }
}

fn entity_value(entity: &TableEntity, property: &str) -> Option<Literal> {
    match property {
        PARTITION_KEY => Some(Literal::string(&entity.partition_key)),
        ROW_KEY => Some(Literal::string(&entity.row_key)),
        TIMESTAMP => Some(Literal::DateTime(entity.timestamp)),
        _ => entity.properties.get(property).cloned(),
    }
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFilter::Compare {
                property,
                operator,
                value,
            } => write!(f, "{} {} {}", property, operator.as_odata(), odata_literal(value)),
            TableFilter::Exists { property, field } => {
                write!(f, "{} ge {}", property, odata_lower_bound(*field))
            }
            TableFilter::Not(inner) => write!(f, "not ({})", inner),
            TableFilter::And(filters) => write_joined(f, "and", filters),
            TableFilter::Or(filters) => write_joined(f, "or", filters),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, keyword: &str, filters: &[TableFilter]) -> fmt::Result {
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", keyword)?;
        }
        write!(f, "({})", filter)?;
    }
    Ok(())
}

/// Formats a literal in OData syntax.
pub fn odata_literal(value: &Literal) -> String {
    match value {
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Integer(i) => format!("{}L", i),
        Literal::Decimal(d) => odata_decimal(d),
        Literal::Boolean(b) => b.to_string(),
        Literal::DateTime(dt) => odata_datetime(dt),
    }
}

fn odata_decimal(d: &Decimal) -> String {
    let text = d.normalize().to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

fn odata_datetime(dt: &DateTime<Utc>) -> String {
    format!("datetime'{}'", format_timestamp(dt))
}

// Every value of the field's type compares >= this bound, so the comparison
// only fails when the property is absent.
fn odata_lower_bound(field: FieldName) -> String {
    match field.kind() {
        SearchParamType::Date => "datetime'0001-01-01T00:00:00.0000000Z'".to_string(),
        SearchParamType::Number => "-1.7976931348623157E+308".to_string(),
        SearchParamType::Quantity
            if matches!(field, FieldName::QuantityLow | FieldName::QuantityHigh) =>
        {
            "-1.7976931348623157E+308".to_string()
        }
        _ => "''".to_string(),
    }
}

/// Returns the smallest string greater than every string starting with
/// `prefix`, or `None` when no such string exists.
pub fn bump_prefix(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut next = last as u32 + 1;
        // Skip the surrogate range.
        if (0xD800..=0xDFFF).contains(&next) {
            next = 0xE000;
        }
        if let Some(c) = char::from_u32(next) {
            chars.push(c);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Compiles expressions to wide-column filters.
#[derive(Debug, Clone)]
pub struct TableCompiler {
    slots: usize,
    history_suffix: String,
}

impl TableCompiler {
    /// Creates a compiler sharing the projection's slot cap.
    pub fn new(config: &SearchIndexConfig) -> Self {
        Self {
            slots: config.max_index_combinations_per_type,
            history_suffix: config.history_partition_suffix.clone(),
        }
    }

    fn partition_filter(&self, resource_type: &str, history: bool) -> TableFilter {
        let live = TableFilter::compare(
            PARTITION_KEY,
            BinaryOperator::Equal,
            Literal::string(resource_type),
        );
        if !history {
            return live;
        }
        TableFilter::Or(vec![
            live,
            TableFilter::compare(
                PARTITION_KEY,
                BinaryOperator::Equal,
                Literal::string(format!("{}{}", resource_type, self.history_suffix)),
            ),
        ])
    }

    fn visit(&self, expr: &Expression, ctx: &Context<'_>) -> CompileResult<TableFilter> {
        match expr {
            Expression::SearchParameter { param, expression } => {
                let ctx = ctx.with_param(param);
                if ctx.native.is_some() {
                    return self.visit(expression, &ctx);
                }
                if let Some((operator, tests)) = presence_tests(expression, BACKEND)? {
                    let filters = tests
                        .iter()
                        .map(|test| self.presence(test, &ctx))
                        .collect::<CompileResult<Vec<_>>>()?;
                    return Ok(TableFilter::join(operator, filters));
                }
                self.visit_slots(expression, &ctx)
            }

            Expression::Binary {
                field,
                operator,
                value,
                component_index,
            } => {
                if let Some(native) = ctx.native {
                    return Ok(self.native_compare(native, *operator, value, ctx));
                }
                let property = self.property(ctx, *field, *component_index)?;
                Ok(TableFilter::compare(property, *operator, value.clone()))
            }

            Expression::StringMatch {
                field,
                operator,
                value,
                ignore_case,
                component_index,
            } => {
                let (field, value) = if *ignore_case {
                    let normalized = field.normalized().ok_or_else(|| {
                        SearchError::not_supported(
                            format!("case-insensitive match on {}", field),
                            BACKEND,
                        )
                    })?;
                    (normalized, normalize_text(value))
                } else {
                    (*field, value.clone())
                };

                let target = match ctx.native {
                    Some(native) => native_property(native).to_string(),
                    None => self.property(ctx, field, *component_index)?,
                };

                match operator {
                    StringOperator::Equals => Ok(TableFilter::compare(
                        target,
                        BinaryOperator::Equal,
                        Literal::String(value),
                    )),
                    StringOperator::StartsWith => Ok(prefix_range(target, field, &value)),
                    StringOperator::Contains | StringOperator::EndsWith => Err(
                        SearchError::not_supported(format!("{} string match", operator), BACKEND),
                    ),
                }
            }

            Expression::MissingField {
                field,
                is_missing,
                component_index,
            } => {
                let property = match ctx.native {
                    Some(native) => native_property(native).to_string(),
                    None => self.property(ctx, *field, *component_index)?,
                };
                let exists = TableFilter::Exists {
                    property,
                    field: *field,
                };
                Ok(if *is_missing {
                    TableFilter::not(exists)
                } else {
                    exists
                })
            }

            Expression::Multiary {
                operator,
                expressions,
            } => {
                let inner = ctx.with_multiary(*operator);
                let filters = expressions
                    .iter()
                    .map(|e| self.visit(e, &inner))
                    .collect::<CompileResult<Vec<_>>>()?;
                if filters.is_empty() {
                    return Err(SearchError::InvalidExpression {
                        message: "multiary expression without operands".to_string(),
                    });
                }
                Ok(TableFilter::join(*operator, filters))
            }

            Expression::Compartment { .. }
            | Expression::Chained { .. }
            | Expression::Include { .. } => {
                Err(SearchError::not_supported(expr.kind_name(), BACKEND))
            }
        }
    }

    /// ORs the inner expression over every slot of the current parameter.
    fn visit_slots(&self, inner: &Expression, ctx: &Context<'_>) -> CompileResult<TableFilter> {
        let filters = (0..self.slots)
            .map(|slot| self.visit(inner, &ctx.with_slot(slot)))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(TableFilter::join(MultiaryOperator::Or, filters))
    }

    /// ORs presence across all slots, then negates for `missing = true`.
    fn presence(&self, test: &PresenceTest, ctx: &Context<'_>) -> CompileResult<TableFilter> {
        let slots = (0..self.slots)
            .map(|slot| {
                Ok(TableFilter::Exists {
                    property: self.property(
                        &ctx.with_slot(slot),
                        test.field,
                        test.component_index,
                    )?,
                    field: test.field,
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;
        let present = TableFilter::join(MultiaryOperator::Or, slots);
        Ok(if test.is_missing {
            TableFilter::not(present)
        } else {
            present
        })
    }

    fn property(
        &self,
        ctx: &Context<'_>,
        field: FieldName,
        component: Option<usize>,
    ) -> CompileResult<String> {
        match (ctx.param, ctx.slot) {
            (Some(param), Some(slot)) => Ok(property_name(&param.name, slot, field, component)),
            _ => Err(SearchError::InvalidExpression {
                message: format!("field '{}' used outside a search parameter", field),
            }),
        }
    }

    fn native_compare(
        &self,
        native: NativeField,
        operator: BinaryOperator,
        value: &Literal,
        ctx: &Context<'_>,
    ) -> TableFilter {
        let property = native_property(native);
        match (native, operator, ctx.history) {
            (NativeField::Id, BinaryOperator::Equal, true) => {
                let id = value.to_string();
                let history_prefix = format!("{}{}", id, HISTORY_ROW_KEY_SEPARATOR);
                TableFilter::Or(vec![
                    TableFilter::compare(property, operator, value.clone()),
                    prefix_range(property.to_string(), FieldName::String, &history_prefix),
                ])
            }
            (NativeField::ResourceType, BinaryOperator::Equal, true) => {
                self.partition_filter(&value.to_string(), true)
            }
            _ => TableFilter::compare(property, operator, value.clone()),
        }
    }
}

fn native_property(native: NativeField) -> &'static str {
    match native {
        NativeField::ResourceType => PARTITION_KEY,
        NativeField::Id => ROW_KEY,
        NativeField::LastUpdated => TIMESTAMP,
    }
}

/// Compiles a prefix match to the half-open range `[prefix, bump(prefix))`.
fn prefix_range(property: String, field: FieldName, prefix: &str) -> TableFilter {
    if prefix.is_empty() {
        return TableFilter::Exists { property, field };
    }
    let lower = TableFilter::compare(
        property.clone(),
        BinaryOperator::GreaterThanOrEqual,
        Literal::string(prefix),
    );
    match bump_prefix(prefix) {
        Some(upper) => TableFilter::And(vec![
            lower,
            TableFilter::compare(property, BinaryOperator::LessThan, Literal::String(upper)),
        ]),
        None => lower,
    }
}

impl ExpressionCompiler for TableCompiler {
    type Filter = TableFilter;

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn compile(
        &self,
        resource_type: &str,
        expression: Option<&Expression>,
        history: bool,
    ) -> CompileResult<TableFilter> {
        let partition = self.partition_filter(resource_type, history);
        let Some(expression) = expression else {
            return Ok(partition);
        };
        let ctx = Context::root(resource_type, history, "");
        let filter = self.visit(expression, &ctx)?;
        Ok(TableFilter::And(vec![partition, filter]))
    }
}
