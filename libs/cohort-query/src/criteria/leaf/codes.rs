//! Condition, procedure and observation codes.

use super::{by_standard_flag, concept_membership, reject_attributes};
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::Result;
use crate::model::SearchParameter;
use crate::sql::Predicate;
use crate::validate::require_concept_id;

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

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::bind::BindValue;
    use crate::model::{AttrName, CriteriaType, Domain, Operator};

    #[test]
    fn groups_and_leaves_share_a_partition() {
        let params = vec![
            group(param(Domain::Condition, CriteriaType::Icd9Cm, 192819)),
            param(Domain::Condition, CriteriaType::Icd10Cm, 1569178),
        ];
        let mut binder = ParameterBinder::new();
        let sql = compile(&params, &CohortConfig::default(), &mut binder)
            .unwrap()
            .render();
        assert!(sql.starts_with(
            "(is_standard = @p0 AND (concept_id IN UNNEST(@p1) OR concept_id IN (SELECT DISTINCT c.concept_id"
        ));
        assert_eq!(binder.get("@p1"), Some(&BindValue::from(vec![1569178_i64])));
        assert_eq!(binder.get("@p2"), Some(&BindValue::from("CONDITION")));
        assert_eq!(binder.get("@p4"), Some(&BindValue::from(vec![192819_i64])));
    }

    #[test]
    fn group_parents_are_batched_per_vocabulary() {
        let params = vec![
            group(param(Domain::Condition, CriteriaType::Icd9Cm, 1)),
            group(param(Domain::Condition, CriteriaType::Icd9Proc, 2)),
            group(param(Domain::Condition, CriteriaType::Icd10Cm, 3)),
        ];
        let mut binder = ParameterBinder::new();
        let sql = compile(&params, &CohortConfig::default(), &mut binder)
            .unwrap()
            .render();
        assert_eq!(sql.matches("SELECT DISTINCT c.concept_id").count(), 2);
        assert!(binder
            .parameters()
            .iter()
            .any(|p| p.value == BindValue::from(vec![1_i64, 2])));
    }

    #[test]
    fn codes_take_no_attributes() {
        let mut p = param(Domain::Condition, CriteriaType::Snomed, 1);
        p.attributes = vec![attr(AttrName::Num, Operator::Equal, &["1"])];
        assert!(compile(&[p], &CohortConfig::default(), &mut ParameterBinder::new()).is_err());
    }
}
