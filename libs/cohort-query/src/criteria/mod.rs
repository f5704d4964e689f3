//! Participant criteria compilation and the cohort query skeletons built on it.

mod group;
mod leaf;
mod modifiers;
mod temporal;

pub(crate) use group::compile_group;

use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::error::{not_valid, Error, Result};
use crate::job::QueryJob;
use crate::model::{AgeType, Domain, GenderOrSexType, ParticipantCriteria, SearchRequest};
use crate::sql::{is_identifier, JoinKind, OrderBy, Predicate, Query, Select, Source};

/// Alias of the person-level table every skeleton filters.
pub const MAIN_ALIAS: &str = "main";

/// Age expression for [`AgeType::Age`], whole years as of today.
const AGE_FROM_DOB: &str = "DATE_DIFF(CURRENT_DATE, dob, YEAR) - \
    IF(EXTRACT(MONTH FROM dob) * 100 + EXTRACT(DAY FROM dob) > \
    EXTRACT(MONTH FROM CURRENT_DATE) * 100 + EXTRACT(DAY FROM CURRENT_DATE), 1, 0)";

/// Where data-availability flags are checked.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FlagScope<'a> {
    /// The flags are columns of the aliased search person row.
    Row(&'a str),
    /// The person column is checked against the search person table.
    Lookup,
}

/// Conditions restricting `person_column` to the participants of `criteria`.
///
/// Include groups are AND-ed `IN` subqueries, exclude groups are anti-joins,
/// explicit exclusions and data filters follow.
pub(crate) fn participant_predicates(
    criteria: &ParticipantCriteria,
    person_column: &str,
    flags: FlagScope<'_>,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Result<Vec<Predicate>> {
    let (request, exclude_ids) = match criteria {
        ParticipantCriteria::Participants { ids } => {
            let ids = binder.bind(ids.iter().copied().collect::<Vec<_>>());
            return Ok(vec![Predicate::in_unnest(person_column, &ids)]);
        }
        ParticipantCriteria::Search {
            request,
            exclude_ids,
        } => (request, exclude_ids),
    };
    validate_request(request)?;

    let mut predicates = Vec::new();
    for group in &request.includes {
        predicates.push(Predicate::in_query(
            person_column,
            compile_group(group, config, binder)?,
        ));
    }
    for group in &request.excludes {
        let excluded = Select::new(["1"], Source::subquery(compile_group(group, config, binder)?, "x"))
            .filter(Predicate::eq("x.person_id", person_column));
        predicates.push(Predicate::not_exists(excluded));
    }
    if !exclude_ids.is_empty() {
        let ids = binder.bind(exclude_ids.iter().copied().collect::<Vec<_>>());
        predicates.push(Predicate::not_in_unnest(person_column, &ids));
    }
    if !request.data_filters.is_empty() {
        predicates.push(data_filters(&request.data_filters, person_column, flags, config, binder));
    }
    tracing::debug!(
        includes = request.includes.len(),
        excludes = request.excludes.len(),
        exclude_ids = exclude_ids.len(),
        "Compiled participant criteria"
    );
    Ok(predicates)
}

fn validate_request(request: &SearchRequest) -> Result<()> {
    if request.includes.is_empty() && request.excludes.is_empty() {
        return Err(Error::structural(
            "Invalid SearchRequest: includes[] and excludes[] cannot both be empty",
        ));
    }
    if let Some(flag) = request.data_filters.iter().find(|f| !is_identifier(f)) {
        return Err(Error::structural(not_valid("search request", "dataFilters", flag)));
    }
    Ok(())
}

fn data_filters(
    flags: &[String],
    person_column: &str,
    scope: FlagScope<'_>,
    config: &CohortConfig,
    binder: &mut ParameterBinder,
) -> Predicate {
    let qualifier = match scope {
        FlagScope::Row(alias) => format!("{alias}."),
        FlagScope::Lookup => String::new(),
    };
    let checks: Vec<Predicate> = flags
        .iter()
        .map(|flag| Predicate::eq(&format!("{qualifier}{flag}"), &binder.bind(1_i64)))
        .collect();
    match scope {
        FlagScope::Row(_) => Predicate::all(checks),
        FlagScope::Lookup => Predicate::in_query(
            person_column,
            Select::new(["person_id"], Source::table(&config.search_person_table)).filters(checks),
        ),
    }
}

/// Builds the participant-level queries: counts, id listings, random
/// samples and chart aggregates.
#[derive(Debug, Clone, Copy)]
pub struct CohortQueryBuilder<'a> {
    config: &'a CohortConfig,
}

impl<'a> CohortQueryBuilder<'a> {
    pub fn new(config: &'a CohortConfig) -> Self {
        Self { config }
    }

    /// `SELECT COUNT(*) AS count` over the matching participants.
    #[tracing::instrument(skip_all)]
    pub fn participant_count(&self, criteria: &ParticipantCriteria) -> Result<QueryJob> {
        let mut binder = ParameterBinder::new();
        let query = self.person_select(["COUNT(*) AS count"], criteria, &mut binder)?;
        Ok(QueryJob::new(&query.into(), binder))
    }

    #[tracing::instrument(skip_all)]
    pub fn participant_ids(&self, criteria: &ParticipantCriteria) -> Result<QueryJob> {
        self.unioned_participant_ids(std::slice::from_ref(criteria))
    }

    /// Person ids matching any of `criteria`, as one `UNION ALL` query.
    #[tracing::instrument(skip_all, fields(criteria = criteria.len()))]
    pub fn unioned_participant_ids(&self, criteria: &[ParticipantCriteria]) -> Result<QueryJob> {
        if criteria.is_empty() {
            return Err(Error::structural("Bad Request: participant criteria are empty."));
        }
        let mut binder = ParameterBinder::new();
        let selects = criteria
            .iter()
            .map(|c| self.id_select(c, &mut binder).map(Query::from))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryJob::new(&Query::union_all(selects), binder))
    }

    /// Random sample of matching participants with their demographics.
    #[tracing::instrument(skip_all, fields(limit = limit, offset = offset))]
    pub fn random_participants(
        &self,
        criteria: &ParticipantCriteria,
        limit: u32,
        offset: u32,
    ) -> Result<QueryJob> {
        let mut binder = ParameterBinder::new();
        let ids = self.id_select(criteria, &mut binder)?;
        let mut select = Select::new(
            [
                "RAND() AS x",
                "person.person_id",
                "race_concept_id",
                "gender_concept_id",
                "ethnicity_concept_id",
                "sex_at_birth_concept_id",
                "birth_datetime",
                "CASE WHEN death.person_id IS NULL THEN FALSE ELSE TRUE END AS deceased",
            ],
            Source::aliased(&self.config.person_table, "person"),
        )
        .join(
            JoinKind::LeftOuter,
            Source::aliased(&self.config.death_table, "death"),
            Predicate::eq("person.person_id", "death.person_id"),
        )
        .filter(Predicate::in_query("person.person_id", ids))
        .order_by(OrderBy::asc("x"))
        .limit(limit.to_string());
        if offset > 0 {
            select = select.offset(offset.to_string());
        }
        Ok(QueryJob::new(&select.into(), binder))
    }

    /// Participant counts by gender (or sex at birth), race and age range.
    #[tracing::instrument(skip_all, fields(gender_or_sex = %gender_or_sex, age_type = %age_type))]
    pub fn demo_chart(
        &self,
        criteria: &ParticipantCriteria,
        gender_or_sex: GenderOrSexType,
        age_type: AgeType,
    ) -> Result<QueryJob> {
        let age = match age_type {
            AgeType::Age => AGE_FROM_DOB,
            AgeType::AgeAtConsent => "age_at_consent",
            AgeType::AgeAtCdr => "age_at_cdr",
        };
        let age_range = format!(
            "CASE {} {} ELSE '> 65' END AS ageRange",
            age_bucket(age, 18, 44),
            age_bucket(age, 45, 64)
        );
        let mut binder = ParameterBinder::new();
        let select = self
            .person_select(
                [
                    format!("{} AS name", gender_or_sex.column()),
                    "race".to_string(),
                    age_range,
                    "COUNT(*) AS count".to_string(),
                ],
                criteria,
                &mut binder,
            )?
            .group_by(["name", "race", "ageRange"])
            .order_by(OrderBy::asc("name"))
            .order_by(OrderBy::asc("race"))
            .order_by(OrderBy::asc("ageRange"));
        Ok(QueryJob::new(&select.into(), binder))
    }

    /// Most frequent standard concepts of `domain` among the participants.
    #[tracing::instrument(skip_all, fields(domain = %domain, limit = limit))]
    pub fn domain_chart(
        &self,
        criteria: &ParticipantCriteria,
        domain: Domain,
        limit: u32,
    ) -> Result<QueryJob> {
        let mut binder = ParameterBinder::new();
        let ids = self.id_select(criteria, &mut binder)?;
        let domain = binder.bind(domain.as_str());
        let select = Select::new(
            [
                "standard_name AS name",
                "standard_concept_id AS conceptId",
                "COUNT(DISTINCT person_id) AS count",
            ],
            Source::aliased(&self.config.review_events_table, "review"),
        )
        .filter(Predicate::in_query("review.person_id", ids))
        .filter(Predicate::eq("domain", &domain))
        .filter(Predicate::expr("standard_concept_id != 0"))
        .group_by(["name", "conceptId"])
        .order_by(OrderBy::desc("count"))
        .order_by(OrderBy::asc("name"))
        .limit(limit.to_string());
        Ok(QueryJob::new(&select.into(), binder))
    }

    fn id_select(&self, criteria: &ParticipantCriteria, binder: &mut ParameterBinder) -> Result<Select> {
        self.person_select([format!("{MAIN_ALIAS}.person_id")], criteria, binder)
    }

    /// `SELECT <columns> FROM search_person main WHERE <participants>`.
    fn person_select<I, S>(
        &self,
        columns: I,
        criteria: &ParticipantCriteria,
        binder: &mut ParameterBinder,
    ) -> Result<Select>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let predicates = participant_predicates(
            criteria,
            &format!("{MAIN_ALIAS}.person_id"),
            FlagScope::Row(MAIN_ALIAS),
            self.config,
            binder,
        )?;
        Ok(
            Select::new(columns, Source::aliased(&self.config.search_person_table, MAIN_ALIAS))
                .filters(predicates),
        )
    }
}

fn age_bucket(age: &str, low: u32, high: u32) -> String {
    format!("WHEN {age} >= {low} AND {age} <= {high} THEN '{low}-{high}'")
}
