//! Set algebra and temporal groups through the public query builder.

use cohort_query::model::{ParticipantCriteria, SearchRequest};
use cohort_query::{BadRequestReason, CohortConfig, CohortQueryBuilder};
use proptest::prelude::*;
use std::collections::BTreeSet;
use test_support::{group, item, search, temporal_group};

mod test_support;

fn count_sql(criteria: &ParticipantCriteria) -> cohort_query::Result<String> {
    let config = CohortConfig::default();
    CohortQueryBuilder::new(&config)
        .participant_count(criteria)
        .map(|job| job.sql)
}

#[test]
fn include_group_is_membership() {
    let sql = count_sql(&search(vec![group(vec![item(1, None)])], vec![])).unwrap();
    assert_eq!(sql.matches("main.person_id IN (SELECT person_id").count(), 1);
    assert!(!sql.contains("NOT EXISTS"));
}

#[test]
fn include_groups_are_intersected() {
    let sql = count_sql(&search(
        vec![group(vec![item(1, None)]), group(vec![item(2, None)])],
        vec![],
    ))
    .unwrap();
    assert_eq!(sql.matches("main.person_id IN (SELECT person_id").count(), 2);
    assert!(sql.contains(") AND main.person_id IN (SELECT person_id"));
}

#[test]
fn items_within_a_group_are_unioned() {
    let sql = count_sql(&search(vec![group(vec![item(1, None), item(2, None)])], vec![])).unwrap();
    assert_eq!(sql.matches("main.person_id IN (").count(), 1);
    assert!(sql.contains(") UNION ALL ("));
}

#[test]
fn exclude_group_is_an_anti_join() {
    let sql = count_sql(&search(
        vec![group(vec![item(1, None)])],
        vec![group(vec![item(2, None)])],
    ))
    .unwrap();
    assert!(sql.contains(
        "AND NOT EXISTS (SELECT 1 FROM (SELECT person_id FROM `${projectId}.${dataSetId}.cb_search_all_events`"
    ));
    assert!(sql.ends_with(") x WHERE x.person_id = main.person_id)"));
}

#[test]
fn exclude_only_request_is_everyone_else() {
    let sql = count_sql(&search(vec![], vec![group(vec![item(2, None)])])).unwrap();
    assert!(sql.starts_with(
        "SELECT COUNT(*) AS count FROM `${projectId}.${dataSetId}.cb_search_person` main WHERE NOT EXISTS"
    ));
}

#[test]
fn empty_request_is_structural() {
    let err = count_sql(&ParticipantCriteria::search(SearchRequest::default())).unwrap_err();
    assert_eq!(err.reason(), Some(BadRequestReason::Structural));
}

#[test]
fn single_second_side_uses_exists() {
    let group = temporal_group(
        vec![item(1, Some(0)), item(2, Some(1))],
        "X_DAYS_BEFORE",
        Some(5),
    );
    let config = CohortConfig::default();
    let job = CohortQueryBuilder::new(&config)
        .participant_ids(&search(vec![group], vec![]))
        .unwrap();
    assert!(job.sql.contains(
        "SELECT temp1.person_id FROM (SELECT person_id, visit_occurrence_id, entry_date FROM"
    ));
    assert!(job.sql.contains(
        "WHERE EXISTS (SELECT 1 FROM (SELECT person_id, visit_occurrence_id, entry_date FROM"
    ));
    assert!(job.sql.contains(
        "temp2 WHERE (temp1.person_id = temp2.person_id AND \
         temp1.entry_date <= DATE_SUB(temp2.entry_date, INTERVAL @p4 DAY))"
    ));
    assert_eq!(job.parameter("p4"), Some(&cohort_query::BindValue::Int64(5)));
}

#[test]
fn several_second_side_items_use_join() {
    let group = temporal_group(
        vec![item(1, Some(0)), item(2, Some(1)), item(3, Some(1))],
        "DURING_SAME_ENCOUNTER_AS",
        None,
    );
    let config = CohortConfig::default();
    let job = CohortQueryBuilder::new(&config)
        .participant_ids(&search(vec![group], vec![]))
        .unwrap();
    assert!(!job.sql.contains("EXISTS"));
    assert!(job.sql.contains(
        " JOIN (SELECT person_id, visit_occurrence_id, entry_date FROM ((SELECT person_id, visit_occurrence_id, entry_date"
    ));
    assert!(job.sql.contains(
        ") b) temp2 ON (temp1.person_id = temp2.person_id AND \
         temp1.visit_occurrence_id = temp2.visit_occurrence_id)"
    ));
}

#[test]
fn time_value_must_match_time() {
    let config = CohortConfig::default();
    let builder = CohortQueryBuilder::new(&config);
    for (time, value) in [("WITHIN_X_DAYS_OF", None), ("DURING_SAME_ENCOUNTER_AS", Some(3))] {
        let group = temporal_group(vec![item(1, Some(0)), item(2, Some(1))], time, value);
        let err = builder
            .participant_count(&search(vec![group], vec![]))
            .unwrap_err();
        assert_eq!(err.reason(), Some(BadRequestReason::Structural));
    }
}

proptest! {
    #[test]
    fn temporal_groups_need_exactly_sides_zero_and_one(
        sides in prop::collection::vec(prop::option::of(-1_i32..=2), 1..5)
    ) {
        let items = sides
            .iter()
            .enumerate()
            .map(|(i, side)| item(i as i64 + 1, *side))
            .collect();
        let group = temporal_group(items, "DURING_SAME_ENCOUNTER_AS", None);
        let result = count_sql(&search(vec![group], vec![]));

        let all_valid = sides.iter().all(|s| matches!(s, Some(0) | Some(1)));
        let present: BTreeSet<i32> = sides.iter().flatten().copied().collect();
        let expected = all_valid && present.contains(&0) && present.contains(&1);

        match result {
            Ok(_) => prop_assert!(expected),
            Err(err) => {
                prop_assert!(!expected);
                prop_assert_eq!(err.reason(), Some(BadRequestReason::TemporalGroup));
            }
        }
    }
}

/// Participant id SQL with every placeholder replaced by its bound value,
/// so queries binding the same values in a different order compare equal.
fn inlined_ids_sql(group: cohort_query::model::SearchGroup) -> String {
    let config = CohortConfig::default();
    let job = CohortQueryBuilder::new(&config)
        .participant_ids(&search(vec![group], vec![]))
        .unwrap();
    // Highest index first so `@p1` never matches the front of `@p10`
    job.named_parameters
        .iter()
        .rev()
        .fold(job.sql.clone(), |sql, p| {
            sql.replace(&format!("@{}", p.name), &format!("{:?}", p.value))
        })
}

/// Parenthesized group starting right after `marker`.
fn group_after<'s>(sql: &'s str, marker: &str) -> &'s str {
    let open = sql
        .find(marker)
        .unwrap_or_else(|| panic!("{marker:?} missing from {sql}"))
        + marker.len();
    let mut depth = 0;
    for (i, c) in sql[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return &sql[open..=open + i];
                }
            }
            _ => {}
        }
    }
    panic!("unbalanced parentheses after {marker:?} in {sql}")
}

fn temporal_time() -> impl Strategy<Value = (&'static str, Option<i64>)> {
    prop_oneof![
        Just(("DURING_SAME_ENCOUNTER_AS", None)),
        (0_i64..60).prop_map(|days| ("X_DAYS_BEFORE", Some(days))),
        (0_i64..60).prop_map(|days| ("X_DAYS_AFTER", Some(days))),
        (0_i64..60).prop_map(|days| ("WITHIN_X_DAYS_OF", Some(days))),
    ]
}

proptest! {
    // Duplicating the second-side item forces the JOIN form without changing
    // the second-side rows. Both forms feed an IN membership test, so they
    // select the same persons when side A, the second-side rows and the
    // correlation all agree.
    #[test]
    fn exists_and_join_forms_select_the_same_persons((time, days) in temporal_time()) {
        let exists_sql = inlined_ids_sql(temporal_group(
            vec![item(1, Some(0)), item(2, Some(1))],
            time,
            days,
        ));
        let join_sql = inlined_ids_sql(temporal_group(
            vec![item(1, Some(0)), item(2, Some(1)), item(2, Some(1))],
            time,
            days,
        ));
        prop_assert!(exists_sql.contains("main.person_id IN (SELECT temp1.person_id FROM "));
        prop_assert!(join_sql.contains("main.person_id IN (SELECT temp1.person_id FROM "));
        prop_assert!(!join_sql.contains("EXISTS"));

        let first_side = "SELECT temp1.person_id FROM ";
        prop_assert_eq!(group_after(&exists_sql, first_side), group_after(&join_sql, first_side));

        let on_exists = group_after(&exists_sql, "temp2 WHERE ");
        let on_join = group_after(&join_sql, "temp2 ON ");
        prop_assert_eq!(on_exists, on_join);
        if let Some(days) = days {
            let interval = format!("INTERVAL Int64({days}) DAY");
            prop_assert!(on_exists.contains(&interval));
        }

        let second_rows = group_after(&exists_sql, "WHERE EXISTS (SELECT 1 FROM ");
        let joined = format!(
            "JOIN (SELECT person_id, visit_occurrence_id, entry_date FROM ({second_rows} UNION ALL {second_rows}) b) temp2 ON "
        );
        prop_assert!(join_sql.contains(&joined), "{} missing from {}", joined, join_sql);
    }
}
