//! Person-level criteria, answered from the search person table rather than
//! the event table.

use super::reject_attributes;
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::{not_valid, Error, Result};
use crate::model::{AttrName, CriteriaType, SearchParameter};
use crate::sql::{Predicate, Query, Select, Source};
use crate::validate::{parse_i64, require_concept_id, Comparison};
use std::collections::{BTreeMap, BTreeSet};

/// Whole years from date of birth, month granular.
const AGE_SQL: &str = "CAST(FLOOR(DATE_DIFF(CURRENT_DATE, p.dob, MONTH) / 12) AS INT64)";

enum Demographic {
    Age {
        column: &'static str,
        living_only: bool,
        comparison: Comparison<i64>,
    },
    Concept(CriteriaType, i64),
    Deceased,
}

pub(super) fn compile(
    params: &[SearchParameter],
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Query> {
    let parsed = params.iter().map(parse).collect::<Result<Vec<_>>>()?;

    let mut parts = Vec::new();
    let mut concepts: BTreeMap<CriteriaType, BTreeSet<i64>> = BTreeMap::new();
    for demographic in parsed {
        match demographic {
            Demographic::Age {
                column,
                living_only,
                comparison,
            } => {
                let mut age = vec![Predicate::expr(comparison.to_sql(column, binder))];
                if living_only {
                    age.push(Predicate::not_exists(death_record(config)));
                }
                parts.push(Predicate::all(age));
            }
            Demographic::Concept(criteria_type, concept_id) => {
                concepts.entry(criteria_type).or_default().insert(concept_id);
            }
            Demographic::Deceased => parts.push(Predicate::exists(death_record(config))),
        }
    }
    for (criteria_type, ids) in concepts {
        let ids = binder.bind(ids.into_iter().collect::<Vec<_>>());
        parts.push(Predicate::in_unnest(concept_column(criteria_type), &ids));
    }

    Ok(
        Select::new(["person_id"], Source::aliased(&config.search_person_table, "p"))
            .filter(Predicate::any(parts))
            .into(),
    )
}

fn parse(param: &SearchParameter) -> Result<Demographic> {
    match param.criteria_type {
        CriteriaType::Age => {
            let [attribute] = param.attributes.as_slice() else {
                return Err(Error::structural(format!(
                    "Bad Request: age requires exactly one attribute, received {}.",
                    param.attributes.len()
                )));
            };
            let (column, living_only) = match attribute.name {
                AttrName::Age => (AGE_SQL, true),
                AttrName::AgeAtConsent => ("p.age_at_consent", false),
                AttrName::AgeAtCdr => ("p.age_at_cdr", false),
                other => {
                    return Err(Error::enumeration(not_valid("attribute", "name", other)));
                }
            };
            let operator = attribute.operator.ok_or_else(|| {
                Error::structural(not_valid("attribute", "operator", attribute.operator))
            })?;
            let comparison = Comparison::parse("attribute", operator, &attribute.operands, parse_i64)?;
            Ok(Demographic::Age {
                column,
                living_only,
                comparison,
            })
        }
        CriteriaType::Gender | CriteriaType::Sex | CriteriaType::Race | CriteriaType::Ethnicity => {
            reject_attributes(param)?;
            Ok(Demographic::Concept(
                param.criteria_type,
                require_concept_id(param)?,
            ))
        }
        CriteriaType::Deceased => {
            reject_attributes(param)?;
            Ok(Demographic::Deceased)
        }
        other => Err(Error::enumeration(not_valid(
            "search parameter",
            "type",
            other,
        ))),
    }
}

fn concept_column(criteria_type: CriteriaType) -> &'static str {
    match criteria_type {
        CriteriaType::Sex => "p.sex_at_birth_concept_id",
        CriteriaType::Race => "p.race_concept_id",
        CriteriaType::Ethnicity => "p.ethnicity_concept_id",
        _ => "p.gender_concept_id",
    }
}

fn death_record(config: &CohortConfig) -> Select {
    Select::new(["'x'"], Source::aliased(&config.death_table, "d"))
        .filter(Predicate::eq("d.person_id", "p.person_id"))
}
