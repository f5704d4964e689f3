//! Mention ranking and time correlation for temporal groups.
//!
//! The first temporal side is aliased `temp1`, the second `temp2`.

use crate::error::{not_valid, Error, Result};
use crate::model::{SearchGroupItem, TemporalMention, TemporalTime};
use crate::sql::{Predicate, Query, Select, Source};

/// Columns every temporal side exposes.
pub(crate) const TEMPORAL_COLUMNS: [&str; 3] = ["person_id", "visit_occurrence_id", "entry_date"];

/// Split temporal items into the two sides by `temporalGroup`.
pub(crate) fn partition(
    items: &[SearchGroupItem],
) -> Result<(Vec<&SearchGroupItem>, Vec<&SearchGroupItem>)> {
    let mut first = Vec::new();
    let mut second = Vec::new();
    for item in items {
        match item.temporal_group {
            Some(0) => first.push(item),
            Some(1) => second.push(item),
            other => {
                return Err(Error::temporal_group(not_valid(
                    "search group item",
                    "temporalGroup",
                    other,
                )))
            }
        }
    }
    if first.is_empty() || second.is_empty() {
        return Err(Error::temporal_group(
            "Bad Request: Search Group Items must provide 2 different temporal groups (0 or 1).",
        ));
    }
    Ok((first, second))
}

/// Keep every row for `ANY_MENTION`, otherwise the earliest or latest
/// per person (ties kept).
pub(crate) fn shape(rows: Query, mention: TemporalMention) -> Query {
    let order = match mention {
        TemporalMention::AnyMention => return rows,
        TemporalMention::FirstMention => "entry_date",
        TemporalMention::LastMention => "entry_date DESC",
    };
    let ranked = Select::new(
        TEMPORAL_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain([format!("RANK() OVER (PARTITION BY person_id ORDER BY {order}) rn")]),
        Source::subquery(rows, "a"),
    );
    Select::new(TEMPORAL_COLUMNS, Source::subquery(ranked, "ranked"))
        .filter(Predicate::expr("rn = 1"))
        .into()
}

/// Condition correlating `temp1` with `temp2`. `days` is the placeholder
/// bound to `timeValue` for day-offset relationships.
pub(crate) fn correlation(time: TemporalTime, days: Option<&str>) -> Predicate {
    let same_person = Predicate::eq("temp1.person_id", "temp2.person_id");
    let days = days.unwrap_or("0");
    let timing = match time {
        TemporalTime::DuringSameEncounterAs => {
            Predicate::eq("temp1.visit_occurrence_id", "temp2.visit_occurrence_id")
        }
        TemporalTime::XDaysBefore => Predicate::expr(format!(
            "temp1.entry_date <= DATE_SUB(temp2.entry_date, INTERVAL {days} DAY)"
        )),
        TemporalTime::XDaysAfter => Predicate::expr(format!(
            "temp1.entry_date >= DATE_ADD(temp2.entry_date, INTERVAL {days} DAY)"
        )),
        TemporalTime::WithinXDaysOf => Predicate::expr(format!(
            "temp1.entry_date BETWEEN DATE_SUB(temp2.entry_date, INTERVAL {days} DAY) \
             AND DATE_ADD(temp2.entry_date, INTERVAL {days} DAY)"
        )),
    };
    Predicate::all(vec![same_person, timing])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BadRequestReason;
    use crate::model::Domain;

    fn item(temporal_group: Option<i32>) -> SearchGroupItem {
        SearchGroupItem {
            id: None,
            domain: Domain::Condition,
            search_parameters: Vec::new(),
            modifiers: Vec::new(),
            temporal_group,
        }
    }

    #[test]
    fn partition_requires_both_sides() {
        let items = vec![item(Some(0)), item(Some(1)), item(Some(0))];
        let (first, second) = partition(&items).unwrap();
        assert_eq!((first.len(), second.len()), (2, 1));

        for bad in [
            vec![item(Some(0)), item(Some(0))],
            vec![item(Some(0)), item(None)],
            vec![item(Some(0)), item(Some(2))],
            vec![],
        ] {
            let err = partition(&bad).unwrap_err();
            assert_eq!(err.reason(), Some(BadRequestReason::TemporalGroup));
        }
    }

    #[test]
    fn mention_ranking() {
        let rows: Query = Select::new(TEMPORAL_COLUMNS, Source::table("events")).into();
        assert_eq!(shape(rows.clone(), TemporalMention::AnyMention), rows);
        assert_eq!(
            shape(rows, TemporalMention::LastMention).render(),
            "SELECT person_id, visit_occurrence_id, entry_date FROM (SELECT person_id, \
             visit_occurrence_id, entry_date, RANK() OVER (PARTITION BY person_id ORDER BY entry_date DESC) rn \
             FROM (SELECT person_id, visit_occurrence_id, entry_date FROM `${projectId}.${dataSetId}.events`) a) ranked \
             WHERE rn = 1"
        );
    }

    #[test]
    fn correlation_conditions() {
        assert_eq!(
            correlation(TemporalTime::DuringSameEncounterAs, None).render(),
            "(temp1.person_id = temp2.person_id AND temp1.visit_occurrence_id = temp2.visit_occurrence_id)"
        );
        assert_eq!(
            correlation(TemporalTime::WithinXDaysOf, Some("@p4")).render(),
            "(temp1.person_id = temp2.person_id AND temp1.entry_date BETWEEN \
             DATE_SUB(temp2.entry_date, INTERVAL @p4 DAY) AND DATE_ADD(temp2.entry_date, INTERVAL @p4 DAY))"
        );
    }
}
