//! Drug exposures. ATC classes and grouped ingredients expand through the
//! ancestor table; RXNORM leaves match directly.

use super::hierarchy::{TreeLookup, Vocabulary};
use super::{by_standard_flag, reject_attributes};
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::Result;
use crate::model::{CriteriaType, Domain, SearchParameter};
use crate::sql::Predicate;
use crate::validate::require_concept_id;
use std::collections::{BTreeMap, BTreeSet};

pub(super) fn compile(
    params: &[SearchParameter],
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    for param in params {
        require_concept_id(param)?;
        reject_attributes(param)?;
    }
    Ok(by_standard_flag(
        params,
        |p| p.standard,
        binder,
        |members, flag, binder| membership(members, flag, config, binder),
    ))
}

fn expands(param: &SearchParameter) -> bool {
    param.criteria_type == CriteriaType::Atc || param.group || param.ancestor_data
}

fn membership(
    params: &[&SearchParameter],
    standard_flag: &str,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Vec<Predicate> {
    let mut direct = BTreeSet::new();
    let mut parents: BTreeMap<Vocabulary, BTreeSet<i64>> = BTreeMap::new();
    for param in params {
        let Some(concept_id) = param.concept_id else {
            continue;
        };
        if expands(param) {
            parents
                .entry(Vocabulary::of(param.criteria_type))
                .or_default()
                .insert(concept_id);
        } else {
            direct.insert(concept_id);
        }
    }

    let mut parts = Vec::new();
    if !direct.is_empty() {
        let ids = binder.bind(direct.into_iter().collect::<Vec<_>>());
        parts.push(Predicate::in_unnest("concept_id", &ids));
    }
    for (vocabulary, ids) in parents {
        let lookup = TreeLookup {
            domain: Domain::Drug,
            vocabulary,
            standard_flag,
            parent_ids: ids.into_iter().collect(),
        };
        parts.push(Predicate::in_query(
            "concept_id",
            lookup.ancestor_descendants(config, binder),
        ));
    }
    parts
}
