//! Search groups: OR across items, or a temporal correlation between two
//! sides of items.

use super::leaf::{self, Leaf};
use super::modifiers::Modifiers;
use super::temporal::{self, TEMPORAL_COLUMNS};
use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::{not_valid, Error, Result};
use crate::model::{Domain, SearchGroup, SearchGroupItem, TemporalMention};
use crate::sql::{JoinKind, Predicate, Query, Select, Source};

/// Query returning the `person_id` of every member of `group`.
pub(crate) fn compile_group(
    group: &SearchGroup,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Query> {
    if group.items.is_empty() {
        return Err(Error::structural("Bad Request: search group items are empty."));
    }
    let query = if group.temporal {
        compile_temporal(group, config, binder)?
    } else {
        let persons = group
            .items
            .iter()
            .map(|item| item_persons(item, config, binder))
            .collect::<Result<Vec<_>>>()?;
        Query::union_all(persons)
    };
    tracing::debug!(
        group = group.id.as_deref().unwrap_or(""),
        items = group.items.len(),
        temporal = group.temporal,
        "Compiled search group"
    );
    Ok(query)
}

fn compile_temporal(
    group: &SearchGroup,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Query> {
    let (first, second) = temporal::partition(&group.items)?;
    let time = group
        .time
        .ok_or_else(|| Error::structural(not_valid("search group", "time", group.time)))?;
    match (time.is_day_offset(), group.time_value) {
        (true, None) | (false, Some(_)) => {
            return Err(Error::structural(not_valid(
                "search group",
                "timeValue",
                group.time_value,
            )))
        }
        (true, Some(days)) if days < 0 => {
            return Err(Error::type_mismatch(not_valid(
                "search group",
                "timeValue",
                days,
            )))
        }
        _ => {}
    }
    let mention = group.mention.unwrap_or(TemporalMention::AnyMention);

    let first = first
        .into_iter()
        .map(|item| item_rows(item, config, binder))
        .collect::<Result<Vec<_>>>()?;
    let second = second
        .into_iter()
        .map(|item| item_rows(item, config, binder))
        .collect::<Result<Vec<_>>>()?;
    let single_second = second.len() == 1;

    let days = group.time_value.map(|days| binder.bind(days));
    let on = temporal::correlation(time, days.as_deref());

    let temp1 = Source::subquery(temporal::shape(Query::union_all(first), mention), "temp1");
    let select = Select::new(["temp1.person_id"], temp1);
    let query = if single_second {
        let matches = Select::new(["1"], Source::subquery(Query::union_all(second), "temp2"))
            .filter(on);
        select.filter(Predicate::exists(matches))
    } else {
        let projected = Select::new(TEMPORAL_COLUMNS, Source::subquery(Query::union_all(second), "b"));
        select.join(JoinKind::Inner, Source::subquery(projected, "temp2"), on)
    };
    Ok(query.into())
}

/// Person ids matched by one item, modifiers applied.
pub(crate) fn item_persons(
    item: &SearchGroupItem,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Query> {
    let modifiers = Modifiers::parse(&item.modifiers)?;
    if item.domain == Domain::Person && !modifiers.is_empty() {
        return Err(Error::structural(format!(
            "Bad Request: modifiers are not supported for {} search group items.",
            item.domain
        )));
    }
    let predicate = match leaf::compile(item, config, binder)? {
        Leaf::Persons(query) => return Ok(query),
        Leaf::Events(predicate) => predicate,
    };
    let mut filters = vec![predicate];
    filters.extend(modifiers.row_predicates(binder));

    match modifiers.occurrence_having(binder) {
        Some(having) => Ok(occurrence_persons(filters, having, config).into()),
        None => Ok(Select::new(["person_id"], Source::table(&config.search_events_table))
            .filters(filters)
            .into()),
    }
}

/// Event rows matched by one item, for use on a temporal side.
fn item_rows(
    item: &SearchGroupItem,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Query> {
    if item.domain == Domain::Person {
        return Err(Error::temporal_group(format!(
            "Bad Request: {} search group items cannot be used in a temporal group.",
            item.domain
        )));
    }
    let modifiers = Modifiers::parse(&item.modifiers)?;
    let predicate = match leaf::compile(item, config, binder)? {
        Leaf::Events(predicate) => predicate,
        Leaf::Persons(_) => {
            return Err(Error::temporal_group(not_valid(
                "search group item",
                "type",
                item.domain,
            )))
        }
    };
    let mut filters = vec![predicate];
    filters.extend(modifiers.row_predicates(binder));

    let mut rows = Select::new(TEMPORAL_COLUMNS, Source::table(&config.search_events_table))
        .filters(filters.clone());
    if let Some(having) = modifiers.occurrence_having(binder) {
        rows = rows.filter(Predicate::in_query(
            "person_id",
            occurrence_persons(filters, having, config),
        ));
    }
    Ok(rows.into())
}

/// `SELECT criteria.person_id FROM (distinct events) criteria GROUP BY
/// person, concept HAVING <count>`.
fn occurrence_persons(filters: Vec<Predicate>, having: Predicate, config: &CohortConfig) -> Select {
    let events = Select::new(
        ["person_id", "entry_date", "concept_id"],
        Source::table(&config.search_events_table),
    )
    .distinct()
    .filters(filters);
    Select::new(["criteria.person_id"], Source::subquery(events, "criteria"))
        .group_by(["criteria.person_id", "criteria.concept_id"])
        .having(having)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BadRequestReason;
    use crate::model::{CriteriaType, Modifier, ModifierType, Operator, SearchParameter, TemporalTime};

    fn condition(concept_id: i64, temporal_group: Option<i32>) -> SearchGroupItem {
        SearchGroupItem {
            id: None,
            domain: Domain::Condition,
            search_parameters: vec![SearchParameter {
                parameter_id: None,
                domain: Domain::Condition,
                criteria_type: CriteriaType::Icd10Cm,
                subtype: None,
                group: false,
                standard: false,
                ancestor_data: false,
                concept_id: Some(concept_id),
                value: None,
                attributes: Vec::new(),
            }],
            modifiers: Vec::new(),
            temporal_group,
        }
    }

    fn temporal(items: Vec<SearchGroupItem>, time: TemporalTime, time_value: Option<i64>) -> SearchGroup {
        SearchGroup {
            id: None,
            items,
            temporal: true,
            mention: Some(TemporalMention::FirstMention),
            time: Some(time),
            time_value,
        }
    }

    const EVENTS: &str = "`${projectId}.${dataSetId}.cb_search_all_events`";

    #[test]
    fn items_are_unioned() {
        let group = SearchGroup {
            id: None,
            items: vec![condition(1, None), condition(2, None)],
            temporal: false,
            mention: None,
            time: None,
            time_value: None,
        };
        let sql = compile_group(&group, &CohortConfig::default(), &mut ParameterBinder::new())
            .unwrap()
            .render();
        assert_eq!(
            sql,
            format!(
                "(SELECT person_id FROM {EVENTS} WHERE (is_standard = @p0 AND concept_id IN UNNEST(@p1))) \
                 UNION ALL (SELECT person_id FROM {EVENTS} WHERE (is_standard = @p2 AND concept_id IN UNNEST(@p3)))"
            )
        );
    }

    #[test]
    fn occurrences_group_by_person_and_concept() {
        let mut item = condition(1, None);
        item.modifiers = vec![
            Modifier {
                name: ModifierType::NumOfOccurrences,
                operator: Operator::GreaterThanOrEqualTo,
                operands: vec!["2".to_string()],
            },
            Modifier {
                name: ModifierType::AgeAtEvent,
                operator: Operator::LessThan,
                operands: vec!["30".to_string()],
            },
        ];
        let sql = item_persons(&item, &CohortConfig::default(), &mut ParameterBinder::new())
            .unwrap()
            .render();
        assert_eq!(
            sql,
            format!(
                "SELECT criteria.person_id FROM (SELECT DISTINCT person_id, entry_date, concept_id \
                 FROM {EVENTS} WHERE (is_standard = @p0 AND concept_id IN UNNEST(@p1)) AND age_at_event < @p2) criteria \
                 GROUP BY criteria.person_id, criteria.concept_id HAVING COUNT(criteria.person_id) >= @p3"
            )
        );
    }

    #[test]
    fn single_second_item_uses_exists() {
        let group = temporal(
            vec![condition(1, Some(0)), condition(2, Some(1))],
            TemporalTime::XDaysBefore,
            Some(5),
        );
        let mut binder = ParameterBinder::new();
        let sql = compile_group(&group, &CohortConfig::default(), &mut binder)
            .unwrap()
            .render();
        assert!(sql.starts_with("SELECT temp1.person_id FROM (SELECT person_id, visit_occurrence_id, entry_date FROM (SELECT"));
        assert!(sql.contains("RANK() OVER (PARTITION BY person_id ORDER BY entry_date) rn"));
        assert!(sql.ends_with(
            "temp1 WHERE EXISTS (SELECT 1 FROM (SELECT person_id, visit_occurrence_id, entry_date \
             FROM `${projectId}.${dataSetId}.cb_search_all_events` WHERE (is_standard = @p2 AND concept_id IN UNNEST(@p3))) temp2 \
             WHERE (temp1.person_id = temp2.person_id AND temp1.entry_date <= DATE_SUB(temp2.entry_date, INTERVAL @p4 DAY)))"
        ));
        assert_eq!(binder.get("@p4"), Some(&crate::bind::BindValue::Int64(5)));
    }

    #[test]
    fn several_second_items_use_join() {
        let group = temporal(
            vec![condition(1, Some(0)), condition(2, Some(1)), condition(3, Some(1))],
            TemporalTime::DuringSameEncounterAs,
            None,
        );
        let sql = compile_group(&group, &CohortConfig::default(), &mut ParameterBinder::new())
            .unwrap()
            .render();
        assert!(sql.contains(") temp1 JOIN (SELECT person_id, visit_occurrence_id, entry_date FROM (("));
        assert!(sql.ends_with(
            ") b) temp2 ON (temp1.person_id = temp2.person_id AND temp1.visit_occurrence_id = temp2.visit_occurrence_id)"
        ));
        assert!(!sql.contains("EXISTS"));
    }

    #[test]
    fn temporal_validation() {
        let config = CohortConfig::default();
        let items = || vec![condition(1, Some(0)), condition(2, Some(1))];

        let err = compile_group(&temporal(items(), TemporalTime::XDaysAfter, None), &config, &mut ParameterBinder::new())
            .unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Structural));

        let err = compile_group(
            &temporal(items(), TemporalTime::DuringSameEncounterAs, Some(3)),
            &config,
            &mut ParameterBinder::new(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Structural));

        let err = compile_group(&temporal(items(), TemporalTime::XDaysAfter, Some(-1)), &config, &mut ParameterBinder::new())
            .unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Type));

        let mut no_time = temporal(items(), TemporalTime::XDaysAfter, Some(1));
        no_time.time = None;
        let err = compile_group(&no_time, &config, &mut ParameterBinder::new()).unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Structural));

        let one_sided = temporal(
            vec![condition(1, Some(0)), condition(2, Some(0))],
            TemporalTime::XDaysAfter,
            Some(1),
        );
        let err = compile_group(&one_sided, &config, &mut ParameterBinder::new()).unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::TemporalGroup));
    }

    #[test]
    fn demographics_cannot_be_temporal_or_modified() {
        let mut person = condition(1, Some(1));
        person.domain = Domain::Person;
        person.search_parameters[0].domain = Domain::Person;
        person.search_parameters[0].criteria_type = CriteriaType::Gender;
        let group = temporal(vec![condition(1, Some(0)), person.clone()], TemporalTime::WithinXDaysOf, Some(1));
        let err = compile_group(&group, &CohortConfig::default(), &mut ParameterBinder::new()).unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::TemporalGroup));

        person.modifiers = vec![Modifier {
            name: ModifierType::AgeAtEvent,
            operator: Operator::GreaterThan,
            operands: vec!["1".to_string()],
        }];
        let err = item_persons(&person, &CohortConfig::default(), &mut ParameterBinder::new()).unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Structural));
    }
}
