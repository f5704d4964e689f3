//! Operator and operand checks shared by the criteria and field-set compilers.

use crate::bind::ParameterBinder;
use crate::error::{not_valid, Error, Result};
use crate::model::{Operator, SearchParameter};
use chrono::NaiveDate;

/// Operators accepted on numeric attributes and modifiers.
pub(crate) const COMPARISON: &[Operator] = &[
    Operator::Equal,
    Operator::NotEqual,
    Operator::LessThan,
    Operator::GreaterThan,
    Operator::LessThanOrEqualTo,
    Operator::GreaterThanOrEqualTo,
    Operator::Between,
];

/// Operators accepted on categorical (set membership) values.
pub(crate) const MEMBERSHIP: &[Operator] = &[Operator::In, Operator::NotIn];

/// `BETWEEN` takes two operands, `IN`/`NOT_IN` at least one, anything else one.
pub(crate) fn check_arity(subject: &str, operator: Operator, operands: &[String]) -> Result<()> {
    let ok = match operator {
        Operator::Between => operands.len() == 2,
        Operator::In | Operator::NotIn => !operands.is_empty(),
        _ => operands.len() == 1,
    };
    if ok {
        return Ok(());
    }
    let expected = match operator {
        Operator::Between => "exactly 2 operands",
        Operator::In | Operator::NotIn => "at least 1 operand",
        _ => "exactly 1 operand",
    };
    Err(Error::arity(format!(
        "Bad Request: {subject} operator {operator} requires {expected}, received {}.",
        operands.len()
    )))
}

pub(crate) fn check_operator(subject: &str, operator: Operator, allowed: &[Operator]) -> Result<()> {
    if allowed.contains(&operator) {
        Ok(())
    } else {
        Err(Error::enumeration(not_valid(subject, "operator", operator)))
    }
}

pub(crate) fn parse_i64(subject: &str, operand: &str) -> Result<i64> {
    operand
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::type_mismatch(not_valid(subject, "operand", operand)))
}

pub(crate) fn parse_f64(subject: &str, operand: &str) -> Result<f64> {
    match operand.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(Error::type_mismatch(not_valid(subject, "operand", operand))),
    }
}

/// `YYYY-MM-DD`.
pub(crate) fn parse_date(subject: &str, operand: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(operand.trim(), "%Y-%m-%d")
        .map_err(|_| Error::type_mismatch(not_valid(subject, "operand", operand)))
}

pub(crate) fn require_concept_id(param: &SearchParameter) -> Result<i64> {
    param
        .concept_id
        .ok_or_else(|| Error::structural(not_valid("search parameter", "conceptId", param.concept_id)))
}

/// Validated numeric comparison, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Comparison<T> {
    pub operator: Operator,
    pub operands: Vec<T>,
}

impl<T: Into<crate::bind::BindValue> + Clone> Comparison<T> {
    /// Parse `operands` for a comparison operator (including `BETWEEN`).
    pub fn parse(
        subject: &str,
        operator: Operator,
        operands: &[String],
        parse: impl Fn(&str, &str) -> Result<T>,
    ) -> Result<Self> {
        check_operator(subject, operator, COMPARISON)?;
        check_arity(subject, operator, operands)?;
        let operands = operands
            .iter()
            .map(|o| parse(subject, o))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { operator, operands })
    }

    /// `lhs <op> @a` or `lhs BETWEEN @a AND @b`.
    pub fn to_sql(&self, lhs: &str, binder: &mut ParameterBinder) -> String {
        let placeholders: Vec<String> = self
            .operands
            .iter()
            .map(|o| binder.bind(o.clone()))
            .collect();
        format!("{lhs} {} {}", self.operator.sql(), placeholders.join(" AND "))
    }
}
