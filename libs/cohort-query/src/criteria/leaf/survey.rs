//! PPI surveys: whole surveys, single questions, or question/answer pairs.

use super::by_standard_flag;
use super::hierarchy::{TreeLookup, Vocabulary};
use super::measurement::{parse_categorical, Categorical, ValueCriterion};
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::{not_valid, Error, Result};
use crate::model::{
    AttrName, Attribute, CriteriaSubType, CriteriaType, Domain, Operator, SearchParameter,
};
use crate::sql::Predicate;
use crate::validate::require_concept_id;

pub(super) fn compile(
    params: &[SearchParameter],
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Predicate> {
    let parsed = params.iter().map(Parsed::parse).collect::<Result<Vec<_>>>()?;
    Ok(by_standard_flag(
        &parsed,
        |p| p.standard,
        binder,
        |members, flag, binder| {
            members
                .iter()
                .map(|member| member.to_predicate(flag, config, binder))
                .collect()
        },
    ))
}

enum Selection {
    /// Every question under the survey node.
    Survey(i64),
    Question(i64),
    Answer(ValueCriterion),
}

struct Parsed {
    standard: bool,
    selection: Selection,
    version: Option<Categorical>,
}

impl Parsed {
    fn parse(param: &SearchParameter) -> Result<Self> {
        let subtype = param.subtype.ok_or_else(|| {
            Error::structural(not_valid("search parameter", "subtype", param.subtype))
        })?;
        let concept_id = require_concept_id(param)?;

        let (versions, values): (Vec<&Attribute>, Vec<&Attribute>) = param
            .attributes
            .iter()
            .partition(|a| a.name == AttrName::SurveyVersionConceptId);
        let version = match versions.as_slice() {
            [] => None,
            [attribute] => Some(parse_categorical(attribute)?),
            _ => {
                return Err(Error::structural(format!(
                    "Bad Request: Please provide one {} attribute.",
                    AttrName::SurveyVersionConceptId
                )))
            }
        };

        let selection = match subtype {
            CriteriaSubType::Survey | CriteriaSubType::Question if !values.is_empty() => {
                return Err(Error::enumeration(not_valid(
                    "attribute",
                    "name",
                    values[0].name,
                )));
            }
            CriteriaSubType::Survey => Selection::Survey(concept_id),
            CriteriaSubType::Question => Selection::Question(concept_id),
            CriteriaSubType::Answer => {
                let values: Vec<Attribute> = values.into_iter().cloned().collect();
                match ValueCriterion::parse(concept_id, &values)? {
                    Some(criterion) => Selection::Answer(criterion),
                    None => {
                        return Err(Error::structural(
                            "Bad Request: survey answers require a CAT or NUM attribute.",
                        ))
                    }
                }
            }
            other => {
                return Err(Error::enumeration(not_valid(
                    "search parameter",
                    "subtype",
                    other,
                )))
            }
        };
        Ok(Self {
            standard: param.standard,
            selection,
            version,
        })
    }

    fn to_predicate(
        &self,
        standard_flag: &str,
        config: &CohortConfig,
        binder: &mut ParameterBinder,
    ) -> Predicate {
        let selection = match &self.selection {
            Selection::Survey(concept_id) => {
                let lookup = TreeLookup {
                    domain: Domain::Survey,
                    vocabulary: Vocabulary::of(CriteriaType::Ppi),
                    standard_flag,
                    parent_ids: vec![*concept_id],
                };
                Predicate::in_query("concept_id", lookup.descendants(config, binder))
            }
            Selection::Question(concept_id) => {
                Predicate::eq("concept_id", &binder.bind(*concept_id))
            }
            Selection::Answer(criterion) => {
                criterion.to_predicate("value_source_concept_id", binder)
            }
        };
        let Some(version) = &self.version else {
            return selection;
        };
        let ids = binder.bind(version.concept_ids.clone());
        let version = match version.operator {
            Operator::NotIn => Predicate::not_in_unnest("survey_version_concept_id", &ids),
            _ => Predicate::in_unnest("survey_version_concept_id", &ids),
        };
        Predicate::all(vec![selection, version])
    }
}
