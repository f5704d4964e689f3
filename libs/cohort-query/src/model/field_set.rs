use super::Operator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Comparison on one (possibly dotted) column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnFilter {
    pub column_name: String,
    /// Defaults to `EQUAL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_numbers: Option<Vec<f64>>,
}

impl ColumnFilter {
    pub fn new(column_name: impl Into<String>, operator: Operator) -> Self {
        Self {
            column_name: column_name.into(),
            operator: Some(operator),
            ..Default::default()
        }
    }
}

/// Filter tree node. Exactly one of `column_filter`, `all_of`, `any_of` is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFilters {
    #[serde(default)]
    pub not: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_of: Option<Vec<ResultFilters>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<ResultFilters>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_filter: Option<ColumnFilter>,
}

impl ResultFilters {
    pub fn column(filter: ColumnFilter) -> Self {
        Self {
            column_filter: Some(filter),
            ..Default::default()
        }
    }

    pub fn all_of(filters: Vec<ResultFilters>) -> Self {
        Self {
            all_of: Some(filters),
            ..Default::default()
        }
    }

    pub fn any_of(filters: Vec<ResultFilters>) -> Self {
        Self {
            any_of: Some(filters),
            ..Default::default()
        }
    }

    pub fn negated(mut self) -> Self {
        self.not = !self.not;
        self
    }
}

/// Rows to return from one cohort table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQuery {
    pub table_name: String,
    /// Defaults to every column of the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<ResultFilters>,
    /// `DESCENDING(col)` sorts descending. Defaults to `person_id` then the
    /// primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<String>>,
}

impl TableQuery {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }
}

/// What to materialize. Without a table query, the `person` table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_query: Option<TableQuery>,
}

/// Restrict rows to a concept set, matched on the table's standard or
/// source concept column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptFilter {
    #[serde(default)]
    pub standard_concept_ids: BTreeSet<i64>,
    #[serde(default)]
    pub source_concept_ids: BTreeSet<i64>,
}

impl ConceptFilter {
    pub fn is_empty(&self) -> bool {
        self.standard_concept_ids.is_empty() && self.source_concept_ids.is_empty()
    }
}
