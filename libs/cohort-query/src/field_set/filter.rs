//! Result filter compilation.

use super::columns::{ColumnResolver, ResolvedColumn};
use crate::bind::{BindValue, ParameterBinder, TIMESTAMP_FORMAT};
use crate::error::{not_valid, Error, Result};
use crate::model::{ColumnFilter, ColumnType, ConceptColumns, ConceptFilter, Operator, ResultFilters};
use crate::sql::Predicate;
use chrono::{NaiveDate, NaiveDateTime};

/// Operators a column filter may use.
const FILTER_OPERATORS: &[Operator] = &[
    Operator::Equal,
    Operator::NotEqual,
    Operator::LessThan,
    Operator::GreaterThan,
    Operator::LessThanOrEqualTo,
    Operator::GreaterThanOrEqualTo,
    Operator::Like,
    Operator::In,
];

/// Compile a filter tree. Every column it references is joined before the
/// LIMIT.
pub(super) fn compile_filters(
    filters: &ResultFilters,
    resolver: &mut ColumnResolver<'_>,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    let predicate = match (&filters.column_filter, &filters.all_of, &filters.any_of) {
        (Some(column_filter), None, None) => compile_column_filter(column_filter, resolver, binder)?,
        (None, Some(children), None) => Predicate::all(compile_children(children, "allOf", resolver, binder)?),
        (None, None, Some(children)) => Predicate::any(compile_children(children, "anyOf", resolver, binder)?),
        _ => {
            return Err(Error::structural(
                "Exactly one of allOf, anyOf, or columnFilter must be specified for result filters",
            ))
        }
    };
    Ok(if filters.not {
        predicate.negate()
    } else {
        predicate
    })
}

fn compile_children(
    children: &[ResultFilters],
    field: &str,
    resolver: &mut ColumnResolver<'_>,
    binder: &mut ParameterBinder,
) -> Result<Vec<Predicate>> {
    if children.is_empty() {
        return Err(Error::structural(format!(
            "Bad Request: result filters {field} must not be empty."
        )));
    }
    children
        .iter()
        .map(|child| compile_filters(child, resolver, binder))
        .collect()
}

fn compile_column_filter(
    filter: &ColumnFilter,
    resolver: &mut ColumnResolver<'_>,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    if filter.column_name.is_empty() {
        return Err(Error::structural("Missing column name for column filter"));
    }
    let operator = filter.operator.unwrap_or(Operator::Equal);
    if !FILTER_OPERATORS.contains(&operator) {
        return Err(Error::enumeration(not_valid("column filter", "operator", operator)));
    }
    let column = resolver.resolve(&filter.column_name, true)?;
    if operator == Operator::In {
        in_clause(filter, column, binder)
    } else {
        comparison(filter, operator, column, binder)
    }
}

fn comparison(
    filter: &ColumnFilter,
    operator: Operator,
    column: ResolvedColumn<'_>,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    let config = column.column;
    if filter.values.is_some() || filter.value_numbers.is_some() {
        return Err(Error::structural(format!(
            "Can't use valueNumbers or values with operator {operator}"
        )));
    }
    let value_null = filter.value_null == Some(true);
    let provided = [
        filter.value.is_some(),
        filter.value_date.is_some(),
        filter.value_number.is_some(),
        value_null,
    ];
    if provided.iter().filter(|p| **p).count() != 1 {
        return Err(Error::structural(format!(
            "Exactly one of value, valueDate, valueNumber, and valueNull must be specified \
             for filter on column {}",
            config.name
        )));
    }
    if operator == Operator::Like && filter.value.is_none() {
        return Err(Error::structural("LIKE operator only supported with value"));
    }

    let value: BindValue = if let Some(value) = &filter.value {
        expect_type(config.column_type, &[ColumnType::String], "value", &config.name)?;
        value.clone().into()
    } else if let Some(date) = &filter.value_date {
        match config.column_type {
            ColumnType::Date => NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| {
                    Error::type_mismatch(format!(
                        "Couldn't parse date value {date}; expected format: yyyy-MM-dd"
                    ))
                })?
                .into(),
            ColumnType::Timestamp => NaiveDateTime::parse_from_str(date, TIMESTAMP_FORMAT)
                .map_err(|_| {
                    Error::type_mismatch(format!(
                        "Couldn't parse timestamp value {date}; expected format: yyyy-MM-dd HH:mm:ss UTC"
                    ))
                })?
                .and_utc()
                .into(),
            other => return Err(wrong_type("valueDate", &config.name, other)),
        }
    } else if let Some(number) = filter.value_number {
        match config.column_type {
            ColumnType::Float => number.into(),
            ColumnType::Integer => integral(number, &config.name)?.into(),
            other => return Err(wrong_type("valueNumber", &config.name, other)),
        }
    } else {
        let check = match operator {
            Operator::Equal => "IS NULL",
            Operator::NotEqual => "IS NOT NULL",
            other => {
                return Err(Error::enumeration(format!(
                    "Unsupported operator for valueNull: {other}"
                )))
            }
        };
        return Ok(Predicate::expr(format!("{} {check}", column.qualified())));
    };

    let placeholder = binder.bind(value);
    Ok(Predicate::compare(&column.qualified(), operator.sql(), &placeholder))
}

fn in_clause(
    filter: &ColumnFilter,
    column: ResolvedColumn<'_>,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    let config = column.column;
    if filter.value.is_some()
        || filter.value_number.is_some()
        || filter.value_date.is_some()
        || filter.value_null.is_some()
    {
        return Err(Error::structural("Can't use IN operator with single value filter"));
    }
    let numbers = filter.value_numbers.as_deref().filter(|v| !v.is_empty());
    let strings = filter.values.as_deref().filter(|v| !v.is_empty());
    let value: BindValue = match (numbers, strings) {
        (Some(numbers), None) => {
            expect_type(config.column_type, &[ColumnType::Integer], "valueNumbers", &config.name)?;
            numbers
                .iter()
                .map(|n| integral(*n, &config.name))
                .collect::<Result<Vec<i64>>>()?
                .into()
        }
        (None, Some(strings)) => {
            expect_type(config.column_type, &[ColumnType::String], "values", &config.name)?;
            strings.to_vec().into()
        }
        _ => {
            return Err(Error::structural(format!(
                "Either valueNumbers or values must be specified with in clause on column {}",
                filter.column_name
            )))
        }
    };
    let placeholder = binder.bind(value);
    Ok(Predicate::in_unnest(&column.qualified(), &placeholder))
}

/// Any of the standard and source concept memberships that are present.
/// Concept ids are bound as an `INT64` array as given.
pub(super) fn concept_filter(
    columns: ConceptColumns<'_>,
    concepts: &ConceptFilter,
    resolver: &mut ColumnResolver<'_>,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    let mut any_of = Vec::new();
    for (column, ids) in [
        (columns.standard, &concepts.standard_concept_ids),
        (columns.source, &concepts.source_concept_ids),
    ] {
        if ids.is_empty() {
            continue;
        }
        let column = resolver.resolve(&column.name, true)?.qualified();
        let placeholder = binder.bind(ids.iter().copied().collect::<Vec<i64>>());
        any_of.push(Predicate::in_unnest(&column, &placeholder));
    }
    if any_of.is_empty() {
        return Err(Error::structural("Concept set contains no valid concepts"));
    }
    Ok(Predicate::any(any_of))
}

fn expect_type(actual: ColumnType, allowed: &[ColumnType], field: &str, column: &str) -> Result<()> {
    if allowed.contains(&actual) {
        Ok(())
    } else {
        Err(wrong_type(field, column, actual))
    }
}

fn wrong_type(field: &str, column: &str, actual: ColumnType) -> Error {
    Error::type_mismatch(format!(
        "Can't use {field} with column {column} of type {actual}"
    ))
}

fn integral(number: f64, column: &str) -> Result<i64> {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Ok(number as i64)
    } else {
        Err(Error::type_mismatch(format!(
            "Can't use non-integer value {number} with column {column} of type INTEGER"
        )))
    }
}
