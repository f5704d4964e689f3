//! Visit occurrences.

use super::{by_standard_flag, concept_membership, reject_attributes};
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::Result;
use crate::model::SearchParameter;
use crate::sql::Predicate;
use crate::validate::require_concept_id;

/// Visit concepts: parents match their subtree, children match directly.
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
        |members, flag, binder| concept_membership(members, flag, config, binder),
    ))
}
