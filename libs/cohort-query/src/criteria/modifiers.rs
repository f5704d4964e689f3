//! Item modifiers: age at event, event date, encounter type and number of
//! occurrences.

use crate::bind::ParameterBinder;
use crate::error::{Error, Result};
use crate::model::{Modifier, ModifierType, Operator};
use crate::sql::Predicate;
use crate::validate::{check_arity, check_operator, parse_date, parse_i64, Comparison};
use chrono::NaiveDate;

/// Validated modifiers of one search group item, at most one of each kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Modifiers {
    age_at_event: Option<Comparison<i64>>,
    event_date: Option<Comparison<NaiveDate>>,
    encounters: Option<Vec<i64>>,
    occurrences: Option<Comparison<i64>>,
}

impl Modifiers {
    pub fn parse(modifiers: &[Modifier]) -> Result<Self> {
        let mut parsed = Self::default();
        for modifier in modifiers {
            let subject = "modifier";
            match modifier.name {
                ModifierType::AgeAtEvent => {
                    ensure_single(&parsed.age_at_event, modifier.name)?;
                    parsed.age_at_event = Some(Comparison::parse(
                        subject,
                        modifier.operator,
                        &modifier.operands,
                        parse_i64,
                    )?);
                }
                ModifierType::EventDate => {
                    ensure_single(&parsed.event_date, modifier.name)?;
                    parsed.event_date = Some(Comparison::parse(
                        subject,
                        modifier.operator,
                        &modifier.operands,
                        parse_date,
                    )?);
                }
                ModifierType::Encounters => {
                    ensure_single(&parsed.encounters, modifier.name)?;
                    check_operator(subject, modifier.operator, &[Operator::In])?;
                    check_arity(subject, modifier.operator, &modifier.operands)?;
                    parsed.encounters = Some(
                        modifier
                            .operands
                            .iter()
                            .map(|o| parse_i64(subject, o))
                            .collect::<Result<Vec<_>>>()?,
                    );
                }
                ModifierType::NumOfOccurrences => {
                    ensure_single(&parsed.occurrences, modifier.name)?;
                    parsed.occurrences = Some(Comparison::parse(
                        subject,
                        modifier.operator,
                        &modifier.operands,
                        parse_i64,
                    )?);
                }
            }
        }
        Ok(parsed)
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Row-level conditions AND-ed into the leaf WHERE clause.
    pub fn row_predicates(&self, binder: &mut ParameterBinder) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        if let Some(age) = &self.age_at_event {
            predicates.push(Predicate::expr(age.to_sql("age_at_event", binder)));
        }
        if let Some(date) = &self.event_date {
            predicates.push(Predicate::expr(date.to_sql("entry_date", binder)));
        }
        if let Some(visits) = &self.encounters {
            let ids = binder.bind(visits.clone());
            predicates.push(Predicate::in_unnest("visit_concept_id", &ids));
        }
        predicates
    }

    /// `HAVING` condition for the occurrence count, grouped per person and
    /// concept.
    pub fn occurrence_having(&self, binder: &mut ParameterBinder) -> Option<Predicate> {
        self.occurrences
            .as_ref()
            .map(|count| Predicate::expr(count.to_sql("COUNT(criteria.person_id)", binder)))
    }
}

fn ensure_single<T>(existing: &Option<T>, kind: ModifierType) -> Result<()> {
    if existing.is_none() {
        return Ok(());
    }
    let text = match kind {
        ModifierType::AgeAtEvent => "age at event",
        ModifierType::EventDate => "event date",
        ModifierType::Encounters => "visit type",
        ModifierType::NumOfOccurrences => "number of occurrences",
    };
    Err(Error::structural(format!(
        "Bad Request: Please provide one {text} modifier."
    )))
}
