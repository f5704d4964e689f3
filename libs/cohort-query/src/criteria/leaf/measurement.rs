//! Labs, vitals and physical measurements: concept match plus optional value
//! constraints.

use super::{by_standard_flag, concept_membership};
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::{not_valid, Error, Result};
use crate::model::{AttrName, Attribute, CriteriaSubType, Operator, SearchParameter};
use crate::sql::{Predicate, Query, Select, Source};
use crate::validate::{
    check_arity, check_operator, parse_f64, parse_i64, require_concept_id, Comparison, MEMBERSHIP,
};

pub(super) fn compile(
    params: &[SearchParameter],
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    compile_with(params, false, config, binder)
}

/// Physical measurements additionally accept composite blood-pressure
/// parameters.
pub(super) fn compile_physical(
    params: &[SearchParameter],
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    compile_with(params, true, config, binder)
}

fn compile_with(
    params: &[SearchParameter],
    allow_blood_pressure: bool,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    let parsed = params
        .iter()
        .map(|param| Parsed::parse(param, allow_blood_pressure))
        .collect::<Result<Vec<_>>>()?;

    Ok(by_standard_flag(
        &parsed,
        |p| p.param.standard,
        binder,
        |members, flag, binder| {
            let plain: Vec<&SearchParameter> = members
                .iter()
                .filter(|p| matches!(p.criterion, Criterion::Concept))
                .map(|p| p.param)
                .collect();
            let mut parts = concept_membership(&plain, flag, config, binder);
            for member in members {
                match &member.criterion {
                    Criterion::Concept => {}
                    Criterion::Values(values) => {
                        parts.push(values.to_predicate("value_as_concept_id", binder))
                    }
                    Criterion::BloodPressure(readings) => {
                        parts.push(blood_pressure(readings, flag, config, binder))
                    }
                }
            }
            parts
        },
    ))
}

struct Parsed<'a> {
    param: &'a SearchParameter,
    criterion: Criterion,
}

enum Criterion {
    Concept,
    Values(ValueCriterion),
    BloodPressure(Vec<Reading>),
}

impl<'a> Parsed<'a> {
    fn parse(param: &'a SearchParameter, allow_blood_pressure: bool) -> Result<Self> {
        let is_blood_pressure = param.subtype == Some(CriteriaSubType::Bp)
            || param.attributes.iter().any(|a| a.concept_id.is_some());
        let criterion = if is_blood_pressure {
            if !allow_blood_pressure {
                return Err(Error::structural(not_valid(
                    "search parameter",
                    "subtype",
                    param.subtype,
                )));
            }
            Criterion::BloodPressure(parse_blood_pressure(&param.attributes)?)
        } else {
            let concept_id = require_concept_id(param)?;
            match ValueCriterion::parse(concept_id, &param.attributes)? {
                Some(values) => Criterion::Values(values),
                None => Criterion::Concept,
            }
        };
        Ok(Self { param, criterion })
    }
}

/// Concept plus optional numeric and categorical value filters, AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ValueCriterion {
    pub concept_id: i64,
    pub numeric: Option<Comparison<f64>>,
    pub categorical: Option<Categorical>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Categorical {
    pub operator: Operator,
    pub concept_ids: Vec<i64>,
}

impl ValueCriterion {
    /// `None` when the attributes place no constraint on the value (no
    /// attributes, or only `ANY`).
    pub fn parse(concept_id: i64, attributes: &[Attribute]) -> Result<Option<Self>> {
        let mut criterion = Self {
            concept_id,
            numeric: None,
            categorical: None,
        };
        for attribute in attributes {
            match attribute.name {
                AttrName::Any => {}
                AttrName::Num => {
                    if criterion.numeric.is_some() {
                        return Err(duplicate(attribute));
                    }
                    criterion.numeric = Some(parse_numeric(attribute)?);
                }
                AttrName::Cat => {
                    if criterion.categorical.is_some() {
                        return Err(duplicate(attribute));
                    }
                    criterion.categorical = Some(parse_categorical(attribute)?);
                }
                other => {
                    return Err(Error::enumeration(not_valid("attribute", "name", other)));
                }
            }
        }
        if criterion.numeric.is_none() && criterion.categorical.is_none() {
            return Ok(None);
        }
        Ok(Some(criterion))
    }

    /// `concept_id = @c AND value_as_number ... AND <categorical_column> IN UNNEST(@v)`.
    pub fn to_predicate(&self, categorical_column: &str, binder: &mut ParameterBinder) -> Predicate {
        let mut parts = vec![Predicate::eq("concept_id", &binder.bind(self.concept_id))];
        if let Some(numeric) = &self.numeric {
            parts.push(Predicate::expr(numeric.to_sql("value_as_number", binder)));
        }
        if let Some(categorical) = &self.categorical {
            let ids = binder.bind(categorical.concept_ids.clone());
            parts.push(match categorical.operator {
                Operator::NotIn => Predicate::not_in_unnest(categorical_column, &ids),
                _ => Predicate::in_unnest(categorical_column, &ids),
            });
        }
        Predicate::all(parts)
    }
}

fn duplicate(attribute: &Attribute) -> Error {
    Error::structural(format!(
        "Bad Request: Please provide one {} attribute.",
        attribute.name
    ))
}

fn require_operator(attribute: &Attribute) -> Result<Operator> {
    attribute
        .operator
        .ok_or_else(|| Error::structural(not_valid("attribute", "operator", attribute.operator)))
}

pub(super) fn parse_numeric(attribute: &Attribute) -> Result<Comparison<f64>> {
    let operator = require_operator(attribute)?;
    Comparison::parse("attribute", operator, &attribute.operands, parse_f64)
}

pub(super) fn parse_categorical(attribute: &Attribute) -> Result<Categorical> {
    let operator = require_operator(attribute)?;
    check_operator("attribute", operator, MEMBERSHIP)?;
    check_arity("attribute", operator, &attribute.operands)?;
    let concept_ids = attribute
        .operands
        .iter()
        .map(|o| parse_i64("attribute", o))
        .collect::<Result<Vec<_>>>()?;
    Ok(Categorical {
        operator,
        concept_ids,
    })
}

/// One half of a blood-pressure reading.
#[derive(Debug, Clone, PartialEq)]
struct Reading {
    concept_id: i64,
    numeric: Option<Comparison<f64>>,
}

fn parse_blood_pressure(attributes: &[Attribute]) -> Result<Vec<Reading>> {
    if attributes.len() != 2 {
        return Err(Error::structural(format!(
            "Bad Request: blood pressure requires systolic and diastolic attributes, received {}.",
            attributes.len()
        )));
    }
    attributes
        .iter()
        .map(|attribute| {
            let concept_id = attribute.concept_id.ok_or_else(|| {
                Error::structural(not_valid("attribute", "conceptId", attribute.concept_id))
            })?;
            let numeric = match attribute.name {
                AttrName::Any => None,
                AttrName::Num => Some(parse_numeric(attribute)?),
                other => {
                    return Err(Error::enumeration(not_valid("attribute", "name", other)));
                }
            };
            Ok(Reading {
                concept_id,
                numeric,
            })
        })
        .collect()
}

/// Both readings must be recorded in the same encounter.
fn blood_pressure(
    readings: &[Reading],
    standard_flag: &str,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Predicate {
    let concept_ids = binder.bind(readings.iter().map(|r| r.concept_id).collect::<Vec<_>>());
    let visits = readings
        .iter()
        .map(|reading| {
            let mut select = Select::new(
                ["visit_occurrence_id"],
                Source::table(&config.search_events_table),
            )
            .filter(Predicate::eq("is_standard", standard_flag))
            .filter(Predicate::eq("concept_id", &binder.bind(reading.concept_id)));
            if let Some(numeric) = &reading.numeric {
                select = select.filter(Predicate::expr(numeric.to_sql("value_as_number", binder)));
            }
            Query::from(select)
        })
        .collect();
    Predicate::all(vec![
        Predicate::in_unnest("concept_id", &concept_ids),
        Predicate::in_query("visit_occurrence_id", Query::intersect_distinct(visits)),
    ])
}
