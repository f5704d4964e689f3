//! Field-set compilation: rows of one cohort table for the participants of
//! a cohort.
//!
//! Joins needed only by the SELECT list are applied after the LIMIT: the
//! filtered, ordered and limited rows are computed in an inner query
//! (`inner_results`) and the remaining tables are joined to it in an outer
//! query.

mod columns;
mod filter;

use crate::bind::ParameterBinder;
use crate::config::CohortConfig;
use crate::criteria::{participant_predicates, FlagScope};
use crate::error::{Error, Result};
use crate::job::QueryJob;
use crate::model::{ColumnType, ConceptFilter, ParticipantCriteria, SchemaConfig, TableQuery};
use crate::sql::{JoinKind, OrderBy, Predicate, Query, Select, Source};
use columns::{column_alias, ColumnResolver, JoinedTable, ALIAS_SEPARATOR};
use std::collections::BTreeSet;

const INNER_ALIAS: &str = "inner_results";
const DESCENDING_PREFIX: &str = "DESCENDING(";

/// A selected column of a field-set query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    /// Column as requested, possibly dotted.
    pub name: String,
    /// Result column alias in the compiled SQL.
    pub alias: String,
    pub column_type: ColumnType,
}

/// Compiled field-set query and the columns it returns, in SELECT order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSetQuery {
    pub job: QueryJob,
    pub columns: Vec<OutputColumn>,
}

struct SelectedColumn {
    output: OutputColumn,
    table_alias: String,
    column_name: String,
}

struct OrderColumn {
    qualified: String,
    descending: bool,
}

/// Compiles [`TableQuery`] requests against a warehouse schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSetQueryBuilder<'a> {
    config: &'a CohortConfig,
    schema: &'a SchemaConfig,
}

impl<'a> FieldSetQueryBuilder<'a> {
    pub fn new(config: &'a CohortConfig, schema: &'a SchemaConfig) -> Self {
        Self { config, schema }
    }

    /// One page of `table_query` rows for the participants of `criteria`,
    /// optionally restricted to a concept set.
    #[tracing::instrument(skip_all, fields(table = %table_query.table_name, limit = limit, offset = offset))]
    pub fn build(
        &self,
        table_query: &TableQuery,
        criteria: &ParticipantCriteria,
        concept_filter: Option<&ConceptFilter>,
        limit: u64,
        offset: u64,
    ) -> Result<FieldSetQuery> {
        let mut resolver = ColumnResolver::new(self.schema, &table_query.table_name)?;
        let mut binder = ParameterBinder::new();

        let selected = select_columns(&mut resolver, table_query.columns.as_deref())?;

        let mut filter = table_query
            .filters
            .as_ref()
            .map(|f| filter::compile_filters(f, &mut resolver, &mut binder))
            .transpose()?;
        if let Some(concepts) = concept_filter {
            let columns = self.schema.concept_columns(&table_query.table_name)?;
            let concepts = filter::concept_filter(columns, concepts, &mut resolver, &mut binder)?;
            filter = Some(match filter {
                Some(existing) => Predicate::all(vec![existing, concepts]),
                None => concepts,
            });
        }

        let order = order_columns(&mut resolver, table_query.order_by.as_deref())?;

        let main_table = resolver.main_table();
        let person_column = format!("{main_table}.person_id");
        let participants = participant_predicates(
            criteria,
            &person_column,
            FlagScope::Lookup,
            self.config,
            &mut binder,
        )?;

        let plan = Plan {
            main_table,
            joins: resolver.into_joins(),
            selected: &selected,
            filter: filter.into_iter().chain(participants).collect(),
            order,
            limit,
            offset,
        };
        let query = plan.into_query();
        tracing::debug!(
            columns = selected.len(),
            parameters = binder.len(),
            "Compiled field set query"
        );
        Ok(FieldSetQuery {
            job: QueryJob::new(&query, binder),
            columns: selected.into_iter().map(|c| c.output).collect(),
        })
    }
}

/// Requested columns, or every column of the main table.
fn select_columns(resolver: &mut ColumnResolver<'_>, requested: Option<&[String]>) -> Result<Vec<SelectedColumn>> {
    let names: Vec<String> = match requested {
        Some([]) => return Err(Error::structural("Column list must not be empty")),
        Some(names) => names.to_vec(),
        None => resolver
            .main_columns()
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect(),
    };
    let main_table = resolver.main_table();
    names
        .into_iter()
        .map(|name| {
            let resolved = resolver.resolve(&name, false)?;
            let alias = if resolved.table_alias == main_table {
                resolved.column.name.clone()
            } else {
                format!("{}{ALIAS_SEPARATOR}{}", resolved.table_alias, resolved.column.name)
            };
            let selected = SelectedColumn {
                table_alias: resolved.table_alias.to_string(),
                column_name: resolved.column.name.clone(),
                output: OutputColumn {
                    name,
                    alias,
                    column_type: resolved.column.column_type,
                },
            };
            Ok(selected)
        })
        .collect()
}

/// Explicit order, or `person_id` then the primary key.
fn order_columns(resolver: &mut ColumnResolver<'_>, requested: Option<&[String]>) -> Result<Vec<OrderColumn>> {
    let names: Vec<String> = match requested {
        Some([]) => return Err(Error::structural("Order by list must not be empty")),
        Some(names) => names.to_vec(),
        None => {
            let mut names = vec!["person_id".to_string()];
            if let Some(key) = resolver.main_columns().primary_key() {
                if key.name != "person_id" {
                    names.push(key.name.clone());
                }
            }
            names
        }
    };
    names
        .iter()
        .map(|name| {
            let (column, descending) = match name.get(..DESCENDING_PREFIX.len()) {
                Some(prefix) if prefix.eq_ignore_ascii_case(DESCENDING_PREFIX) && name.ends_with(')') => {
                    (&name[DESCENDING_PREFIX.len()..name.len() - 1], true)
                }
                _ => (name.as_str(), false),
            };
            let resolved = resolver.resolve(column, true)?;
            Ok(OrderColumn {
                qualified: resolved.qualified(),
                descending,
            })
        })
        .collect()
}

/// Everything needed to lay out the inner and outer queries.
struct Plan<'p> {
    main_table: &'p str,
    joins: Vec<JoinedTable>,
    selected: &'p [SelectedColumn],
    filter: Vec<Predicate>,
    order: Vec<OrderColumn>,
    limit: u64,
    offset: u64,
}

impl Plan<'_> {
    fn into_query(self) -> Query {
        let (before, mut after): (Vec<JoinedTable>, Vec<JoinedTable>) =
            self.joins.into_iter().partition(|j| j.before_limit);
        let in_inner = |alias: &str| alias == self.main_table || before.iter().any(|j| j.alias == alias);
        let split = !after.is_empty();

        let mut inner_columns = Vec::new();
        let mut outer_columns = Vec::new();
        let mut inner_aliases = BTreeSet::new();
        for column in self.selected {
            let expr = format!(
                "{}.{} AS {}",
                column.table_alias, column.column_name, column.output.alias
            );
            if in_inner(column.table_alias.as_str()) {
                inner_columns.push(expr);
                if split {
                    inner_aliases.insert(column.output.alias.clone());
                    outer_columns.push(format!("{INNER_ALIAS}.{}", column.output.alias));
                }
            } else {
                outer_columns.push(expr);
            }
        }

        // Outer joins starting from an inner table join to its key column
        // exposed by the inner query.
        for join in after.iter_mut() {
            if in_inner(join.from_alias.as_str()) {
                let qualified = format!("{}.{}", join.from_alias, join.from_column);
                let alias = column_alias(&qualified);
                if inner_aliases.insert(alias.clone()) {
                    inner_columns.push(format!("{qualified} AS {alias}"));
                }
                join.from_alias = INNER_ALIAS.to_string();
                join.from_column = alias;
            }
        }

        if split {
            for order in &self.order {
                let alias = column_alias(&order.qualified);
                if inner_aliases.insert(alias.clone()) {
                    inner_columns.push(format!("{} AS {alias}", order.qualified));
                }
            }
        }

        let mut inner = Select::new(inner_columns, Source::aliased(self.main_table, self.main_table));
        for join in &before {
            inner = with_join(inner, join);
        }
        inner = inner.filters(self.filter);
        for order in &self.order {
            inner = inner.order_by(order_by(order.qualified.clone(), order.descending));
        }
        inner = inner.limit(self.limit.to_string());
        if self.offset > 0 {
            inner = inner.offset(self.offset.to_string());
        }
        if !split {
            return inner.into();
        }

        let mut outer = Select::new(outer_columns, Source::subquery(inner, INNER_ALIAS));
        for join in &after {
            outer = with_join(outer, join);
        }
        for order in &self.order {
            outer = outer.order_by(order_by(column_alias(&order.qualified), order.descending));
        }
        outer.limit(self.limit.to_string()).into()
    }
}

fn with_join(select: Select, join: &JoinedTable) -> Select {
    select.join(
        JoinKind::LeftOuter,
        Source::aliased(&join.table, &join.alias),
        Predicate::eq(
            &format!("{}.{}", join.from_alias, join.from_column),
            &format!("{}.{}", join.alias, join.primary_key),
        ),
    )
}

fn order_by(expr: String, descending: bool) -> OrderBy {
    if descending {
        OrderBy::desc(expr)
    } else {
        OrderBy::asc(expr)
    }
}
