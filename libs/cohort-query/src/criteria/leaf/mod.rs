//! Domain leaf compilers.
//!
//! Each compiler turns one search group item into either a condition over
//! the flat event table (rows of `person_id, entry_date, concept_id,
//! visit_occurrence_id`) or, for demographics, a person-id query.

mod codes;
mod demographics;
mod drug;
mod hierarchy;
mod measurement;
mod survey;
mod visit;

use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::{not_valid, Error, Result};
use crate::model::{CriteriaType, Domain, SearchGroupItem, SearchParameter};
use crate::sql::{Predicate, Query};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) use hierarchy::Vocabulary;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Leaf {
    /// Condition over the event table.
    Events(Predicate),
    /// Query returning `person_id`.
    Persons(Query),
}

pub(crate) fn compile(
    item: &SearchGroupItem,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Leaf> {
    if item.search_parameters.is_empty() {
        return Err(Error::structural("Bad Request: search parameters are empty."));
    }
    for param in &item.search_parameters {
        if param.domain != item.domain {
            return Err(Error::structural(format!(
                "Bad Request: search parameter domain {} does not match search group item type {}.",
                param.domain, item.domain
            )));
        }
        if !allowed_types(item.domain).contains(&param.criteria_type) {
            return Err(Error::enumeration(not_valid(
                "search parameter",
                "type",
                param.criteria_type,
            )));
        }
    }

    let params = &item.search_parameters;
    let leaf = match item.domain {
        Domain::Condition | Domain::Procedure | Domain::Observation => {
            Leaf::Events(codes::compile(params, config, binder)?)
        }
        Domain::Measurement => Leaf::Events(measurement::compile(params, config, binder)?),
        Domain::PhysicalMeasurement => {
            Leaf::Events(measurement::compile_physical(params, config, binder)?)
        }
        Domain::Drug => Leaf::Events(drug::compile(params, config, binder)?),
        Domain::Survey => Leaf::Events(survey::compile(params, config, binder)?),
        Domain::Visit => Leaf::Events(visit::compile(params, config, binder)?),
        Domain::Person => Leaf::Persons(demographics::compile(params, config, binder)?),
    };
    tracing::debug!(
        domain = %item.domain,
        parameters = params.len(),
        "Compiled search group item"
    );
    Ok(leaf)
}

fn allowed_types(domain: Domain) -> &'static [CriteriaType] {
    use CriteriaType::*;
    match domain {
        Domain::Condition | Domain::Procedure | Domain::Observation => {
            &[Icd9Cm, Icd9Proc, Icd10Cm, Icd10Pcs, Cpt4, Snomed, Loinc]
        }
        Domain::Measurement => &[Loinc, Snomed, Cpt4],
        Domain::Drug => &[Atc, RxNorm],
        Domain::PhysicalMeasurement | Domain::Survey => &[Ppi],
        Domain::Visit => &[Visit],
        Domain::Person => &[Age, Gender, Race, Ethnicity, Sex, Deceased],
    }
}

/// OR of one conjunction per `is_standard` partition of `items`, each gated
/// by `is_standard = @p`. Items are validated before this is called.
pub(super) fn by_standard_flag<T, S, F>(
    items: &[T],
    is_standard: S,
    binder: &mut ParameterBinder,
    mut compile: F,
) -> Predicate
where
    S: Fn(&T) -> bool,
    F: FnMut(&[&T], &str, &mut ParameterBinder) -> Vec<Predicate>,
{
    let mut partitions = Vec::new();
    for standard in [true, false] {
        let members: Vec<&T> = items.iter().filter(|i| is_standard(i) == standard).collect();
        if members.is_empty() {
            continue;
        }
        let flag = binder.bind(i64::from(standard));
        let parts = compile(&members, &flag, binder);
        partitions.push(Predicate::all(vec![
            Predicate::eq("is_standard", &flag),
            Predicate::any(parts),
        ]));
    }
    Predicate::any(partitions)
}

/// `concept_id` membership for plain concept parameters: leaves match their
/// own concept, groups match every selectable descendant in the hierarchy.
pub(super) fn concept_membership(
    params: &[&SearchParameter],
    standard_flag: &str,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Vec<Predicate> {
    let mut leaves = BTreeSet::new();
    let mut groups: BTreeMap<(Domain, Vocabulary), BTreeSet<i64>> = BTreeMap::new();
    for param in params {
        let Some(concept_id) = param.concept_id else {
            continue;
        };
        if param.group {
            groups
                .entry((param.domain, Vocabulary::of(param.criteria_type)))
                .or_default()
                .insert(concept_id);
        } else {
            leaves.insert(concept_id);
        }
    }

    let mut parts = Vec::new();
    if !leaves.is_empty() {
        let ids = binder.bind(leaves.into_iter().collect::<Vec<_>>());
        parts.push(Predicate::in_unnest("concept_id", &ids));
    }
    for ((domain, vocabulary), parents) in groups {
        let lookup = hierarchy::TreeLookup {
            domain,
            vocabulary,
            standard_flag,
            parent_ids: parents.into_iter().collect(),
        };
        parts.push(Predicate::in_query(
            "concept_id",
            lookup.descendants(config, binder),
        ));
    }
    parts
}

/// Reject attributes on domains that never carry them.
pub(super) fn reject_attributes(param: &SearchParameter) -> Result<()> {
    match param.attributes.first() {
        Some(attribute) => Err(Error::enumeration(not_valid(
            "attribute",
            "name",
            attribute.name,
        ))),
        None => Ok(()),
    }
}
