//! Paged cohort materialization.
//!
//! Each page fetches one row more than requested; the extra row only tells
//! whether a continuation token is issued.

use crate::config::CohortConfig;
use crate::error::{Error, Result};
use crate::field_set::{FieldSetQuery, FieldSetQueryBuilder};
use crate::job::QueryJob;
use crate::model::{ConceptFilter, FieldSet, ParticipantCriteria, SchemaConfig, TableQuery};
use crate::pagination::{parameter_hash, PaginationToken};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result row keyed by column.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Runs compiled queries against the warehouse.
///
/// Rows are keyed by the result column aliases of the SQL. Implementations
/// report warehouse failures as [`crate::Error::Execution`].
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, job: &QueryJob) -> Result<Vec<Row>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeRequest {
    pub criteria: ParticipantCriteria,
    #[serde(default)]
    pub field_set: FieldSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_filter: Option<ConceptFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl MaterializeRequest {
    /// Hash of everything that shapes the result rows. Page size and token
    /// are left out so a client may change the page size between pages.
    pub fn parameter_hash(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            criteria: &'a ParticipantCriteria,
            field_set: &'a FieldSet,
            concept_filter: Option<&'a ConceptFilter>,
        }
        parameter_hash(&Canonical {
            criteria: &self.criteria,
            field_set: &self.field_set,
            concept_filter: self.concept_filter.as_ref(),
        })
    }
}

/// Compiled page query. `None` when the cohort is an empty participant list.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializePlan {
    pub query: Option<FieldSetQuery>,
    pub offset: i64,
    pub page_size: u32,
    pub parameter_hash: String,
    next_offset: i64,
}

impl MaterializePlan {
    /// Validate the page token of `request` and compile its page query
    /// without running it.
    pub fn build(config: &CohortConfig, schema: &SchemaConfig, request: &MaterializeRequest) -> Result<Self> {
        let parameter_hash = request.parameter_hash()?;
        let offset = match &request.page_token {
            Some(token) => {
                let token = PaginationToken::decode(token)?;
                token.validate(&parameter_hash)?;
                token.offset
            }
            None => 0,
        };
        let page_size = config.page_size(request.page_size);
        let next_offset = offset
            .checked_add(i64::from(page_size))
            .ok_or_else(|| Error::cursor(format!("Page token offset {offset} is out of range")))?;

        let query = match &request.criteria {
            ParticipantCriteria::Participants { ids } if ids.is_empty() => None,
            criteria => {
                let default_query;
                let table_query = match &request.field_set.table_query {
                    Some(table_query) => table_query,
                    None => {
                        default_query = TableQuery {
                            columns: Some(vec!["person_id".to_string()]),
                            ..TableQuery::new(&config.person_table)
                        };
                        &default_query
                    }
                };
                Some(FieldSetQueryBuilder::new(config, schema).build(
                    table_query,
                    criteria,
                    request.concept_filter.as_ref(),
                    u64::from(page_size) + 1,
                    offset.unsigned_abs(),
                )?)
            }
        };
        Ok(Self {
            query,
            offset,
            page_size,
            parameter_hash,
            next_offset,
        })
    }

    /// Token for the page after this one.
    pub fn next_token(&self) -> PaginationToken {
        PaginationToken::new(self.next_offset, self.parameter_hash.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

pub struct CohortMaterializer<'a, E> {
    config: &'a CohortConfig,
    schema: &'a SchemaConfig,
    executor: &'a E,
}

impl<'a, E: QueryExecutor> CohortMaterializer<'a, E> {
    pub fn new(config: &'a CohortConfig, schema: &'a SchemaConfig, executor: &'a E) -> Self {
        Self {
            config,
            schema,
            executor,
        }
    }

    /// Validate the page token and compile the page query.
    pub fn plan(&self, request: &MaterializeRequest) -> Result<MaterializePlan> {
        MaterializePlan::build(self.config, self.schema, request)
    }

    /// Fetch one page of rows, keyed by the requested column names with
    /// nulls dropped.
    #[tracing::instrument(skip_all, fields(page_size = ?request.page_size))]
    pub async fn materialize(&self, request: &MaterializeRequest) -> Result<Page> {
        let plan = self.plan(request)?;
        let Some(query) = &plan.query else {
            tracing::debug!("Empty participant list, nothing to materialize");
            return Ok(Page::default());
        };

        let mut rows = self.executor.execute(&query.job).await?;
        let page_size = plan.page_size as usize;
        let next_page_token = if rows.len() > page_size {
            rows.truncate(page_size);
            Some(plan.next_token().encode())
        } else {
            None
        };
        let rows = rows
            .into_iter()
            .map(|row| rekey(row, query))
            .collect::<Vec<_>>();
        tracing::debug!(
            rows = rows.len(),
            offset = plan.offset,
            has_next = next_page_token.is_some(),
            "Materialized page"
        );
        Ok(Page {
            rows,
            next_page_token,
        })
    }
}

fn rekey(mut row: Row, query: &FieldSetQuery) -> Row {
    query
        .columns
        .iter()
        .filter_map(|column| match row.remove(&column.alias) {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some((column.name.clone(), value)),
        })
        .collect()
}
