//! Concept hierarchy lookups against `cb_criteria` and `cb_criteria_ancestor`.

use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::model::{CriteriaType, Domain};
use crate::sql::{JoinKind, Predicate, Query, Select, Source};

/// Vocabulary filter on `cb_criteria.type`. ICD9 diagnosis and procedure
/// codes share one tree, so they are looked up together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Vocabulary {
    Single(CriteriaType),
    Icd9,
}

impl Vocabulary {
    pub fn of(criteria_type: CriteriaType) -> Self {
        match criteria_type {
            CriteriaType::Icd9Cm | CriteriaType::Icd9Proc => Self::Icd9,
            other => Self::Single(other),
        }
    }

    fn predicate(self, column: &str, binder: &mut ParameterBinder) -> Predicate {
        match self {
            Self::Single(criteria_type) => {
                Predicate::eq(column, &binder.bind(criteria_type.as_str()))
            }
            Self::Icd9 => {
                let types = vec![
                    CriteriaType::Icd9Cm.as_str().to_string(),
                    CriteriaType::Icd9Proc.as_str().to_string(),
                ];
                Predicate::in_unnest(column, &binder.bind(types))
            }
        }
    }
}

/// Selected hierarchy nodes whose selectable descendants should match.
pub(crate) struct TreeLookup<'a> {
    pub domain: Domain,
    pub vocabulary: Vocabulary,
    /// Placeholder already bound to the `is_standard` flag.
    pub standard_flag: &'a str,
    pub parent_ids: Vec<i64>,
}

impl TreeLookup<'_> {
    /// `SELECT DISTINCT c.concept_id ...` for every selectable node whose
    /// path passes through one of the parents.
    pub fn descendants(&self, config: &CohortConfig, binder: &mut ParameterBinder) -> Query {
        let domain = binder.bind(self.domain.as_str());
        let parents = self.parents(&domain, config, binder);
        Select::new(["c.concept_id"], Source::aliased(&config.criteria_table, "c"))
            .distinct()
            .join(
                JoinKind::Inner,
                Source::subquery(parents, "a"),
                Predicate::expr("CONCAT('.', c.path, '.') LIKE CONCAT('%.', a.id, '.%')"),
            )
            .filter(Predicate::eq("c.domain_id", &domain))
            .filter(Predicate::eq("c.is_standard", self.standard_flag))
            .filter(Predicate::expr("c.is_selectable = 1"))
            .into()
    }

    /// Drug-style expansion: resolve the parents through the path lookup, then
    /// take every descendant recorded in the ancestor table.
    pub fn ancestor_descendants(
        &self,
        config: &CohortConfig,
        binder: &mut ParameterBinder,
    ) -> Query {
        let nodes = self.descendants(config, binder);
        Select::new(
            ["ca.descendant_id"],
            Source::aliased(&config.criteria_ancestor_table, "ca"),
        )
        .distinct()
        .join(
            JoinKind::Inner,
            Source::subquery(nodes, "b"),
            Predicate::eq("ca.ancestor_id", "b.concept_id"),
        )
        .into()
    }

    fn parents(&self, domain: &str, config: &CohortConfig, binder: &mut ParameterBinder) -> Select {
        let vocabulary = self.vocabulary.predicate("type", binder);
        let ids = binder.bind(self.parent_ids.clone());
        Select::new(["CAST(id AS STRING) AS id"], Source::table(&config.criteria_table))
            .filter(Predicate::eq("domain_id", domain))
            .filter(vocabulary)
            .filter(Predicate::eq("is_standard", self.standard_flag))
            .filter(Predicate::in_unnest("concept_id", &ids))
            .filter(Predicate::expr("is_group = 1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::BindValue;

    #[test]
    fn icd9_binds_both_vocabularies() {
        let mut binder = ParameterBinder::new();
        let flag = binder.bind(0_i64);
        let lookup = TreeLookup {
            domain: Domain::Condition,
            vocabulary: Vocabulary::of(CriteriaType::Icd9Proc),
            standard_flag: &flag,
            parent_ids: vec![192819],
        };
        let sql = lookup.descendants(&CohortConfig::default(), &mut binder).render();
        assert_eq!(
            sql,
            "SELECT DISTINCT c.concept_id FROM `${projectId}.${dataSetId}.cb_criteria` c \
             JOIN (SELECT CAST(id AS STRING) AS id FROM `${projectId}.${dataSetId}.cb_criteria` \
             WHERE domain_id = @p1 AND type IN UNNEST(@p2) AND is_standard = @p0 \
             AND concept_id IN UNNEST(@p3) AND is_group = 1) a \
             ON CONCAT('.', c.path, '.') LIKE CONCAT('%.', a.id, '.%') \
             WHERE c.domain_id = @p1 AND c.is_standard = @p0 AND c.is_selectable = 1"
        );
        assert_eq!(
            binder.get("@p2"),
            Some(&BindValue::from(vec!["ICD9CM".to_string(), "ICD9PROC".to_string()]))
        );
    }

    #[test]
    fn ancestor_lookup_wraps_path_lookup() {
        let mut binder = ParameterBinder::new();
        let flag = binder.bind(1_i64);
        let lookup = TreeLookup {
            domain: Domain::Drug,
            vocabulary: Vocabulary::of(CriteriaType::Atc),
            standard_flag: &flag,
            parent_ids: vec![21600001],
        };
        let sql = lookup
            .ancestor_descendants(&CohortConfig::default(), &mut binder)
            .render();
        assert!(sql.starts_with(
            "SELECT DISTINCT ca.descendant_id FROM `${projectId}.${dataSetId}.cb_criteria_ancestor` ca JOIN (SELECT DISTINCT c.concept_id"
        ));
        assert!(sql.ends_with(") b ON ca.ancestor_id = b.concept_id"));
        assert_eq!(binder.get("@p2"), Some(&BindValue::from("ATC")));
    }
}
