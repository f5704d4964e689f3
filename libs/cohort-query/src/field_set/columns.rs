//! Column path resolution.
//!
//! A dotted path `a.b.col` walks foreign keys from the main table: `a_id` on
//! the main table, then `b_id` on the table it references, and finally `col`.
//! Every intermediate table is LEFT OUTER JOINed under the alias formed by
//! joining the path prefix with `_` (`a`, `a_b`).

use crate::error::{Error, Result};
use crate::model::{ColumnConfig, SchemaConfig, TableConfig};

pub(super) const TABLE_SEPARATOR: char = '.';
pub(super) const ALIAS_SEPARATOR: &str = "_";

/// A table reached through a foreign key.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct JoinedTable {
    pub alias: String,
    pub table: String,
    pub primary_key: String,
    /// Alias and column the join starts from.
    pub from_alias: String,
    pub from_column: String,
    /// Referenced by WHERE or ORDER BY, so it must be joined before LIMIT.
    pub before_limit: bool,
}

/// A resolved column reference.
#[derive(Debug, Clone, Copy)]
pub(super) struct ResolvedColumn<'a> {
    pub table_alias: &'a str,
    pub column: &'a ColumnConfig,
}

impl ResolvedColumn<'_> {
    /// `alias.column`.
    pub fn qualified(&self) -> String {
        format!("{}{TABLE_SEPARATOR}{}", self.table_alias, self.column.name)
    }
}

/// Resolves column paths against the schema, recording the joins they need.
#[derive(Debug)]
pub(super) struct ColumnResolver<'a> {
    schema: &'a SchemaConfig,
    main_table: &'a str,
    main_columns: &'a TableConfig,
    /// In the order they were first needed.
    joins: Vec<JoinedTable>,
}

impl<'a> ColumnResolver<'a> {
    /// Resolver rooted at `table_name`, which must be a cohort table.
    pub fn new(schema: &'a SchemaConfig, table_name: &'a str) -> Result<Self> {
        let main_columns = match schema.cohort_table(table_name) {
            Some(table) if table.column("person_id").is_some() => table,
            _ if schema.table(table_name).is_some() => {
                return Err(Error::structural(format!(
                    "Not a valid cohort table (lacks person_id column): {table_name}"
                )))
            }
            _ => return Err(Error::structural(format!("Table not found: {table_name}"))),
        };
        Ok(Self {
            schema,
            main_table: table_name,
            main_columns,
            joins: Vec::new(),
        })
    }

    pub fn main_table(&self) -> &'a str {
        self.main_table
    }

    pub fn main_columns(&self) -> &'a TableConfig {
        self.main_columns
    }

    pub fn into_joins(self) -> Vec<JoinedTable> {
        self.joins
    }

    /// Resolve `path`, adding any joins it needs. `before_limit` marks the
    /// joins along the path as required by the inner query.
    pub fn resolve(&mut self, path: &str, before_limit: bool) -> Result<ResolvedColumn<'_>> {
        let parts: Vec<&str> = path.split(TABLE_SEPARATOR).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::structural(format!("Invalid column name: {path}")));
        }
        let Some((column_name, path_parts)) = parts.split_last() else {
            return Err(Error::structural(format!("Invalid column name: {path}")));
        };

        let (table_name, table_index) = self.walk(path_parts, before_limit)?;
        let table = self
            .schema
            .table(table_name)
            .ok_or_else(|| Error::structural(format!("Table not found: {table_name}")))?;
        let column = table.column(column_name).ok_or_else(|| {
            Error::structural(format!(
                "No column {column_name} found on table {table_name}"
            ))
        })?;
        let table_alias = match table_index {
            Some(index) => self.joins[index].alias.as_str(),
            None => self.main_table,
        };
        Ok(ResolvedColumn {
            table_alias,
            column,
        })
    }

    /// Follow the foreign keys named by `path_parts`, reusing the longest
    /// already joined prefix. Returns the final table and its join index
    /// (`None` for the main table).
    fn walk(&mut self, path_parts: &[&str], before_limit: bool) -> Result<(&'a str, Option<usize>)> {
        let mut table_name = self.main_table;
        let mut table_index = None;
        let mut start = 0;

        for end in (1..=path_parts.len()).rev() {
            let alias = to_alias(&path_parts[..end]);
            if let Some(index) = self.join_index(&alias) {
                if before_limit {
                    for prefix in 1..=end {
                        let prefix_alias = to_alias(&path_parts[..prefix]);
                        if let Some(i) = self.join_index(&prefix_alias) {
                            self.joins[i].before_limit = true;
                        }
                    }
                }
                table_name = self.table_name_of(index)?;
                table_index = Some(index);
                start = end;
                break;
            }
        }

        for end in start + 1..=path_parts.len() {
            let part = path_parts[end - 1];
            let from_alias = match table_index {
                Some(index) => self.joins[index].alias.clone(),
                None => self.main_table.to_string(),
            };
            let foreign_key_column = format!("{part}{ALIAS_SEPARATOR}id");
            let from_table = self
                .schema
                .table(table_name)
                .ok_or_else(|| Error::structural(format!("Table not found: {table_name}")))?;
            let foreign_key = from_table.column(&foreign_key_column).ok_or_else(|| {
                Error::structural(format!("No foreign key column found: {foreign_key_column}"))
            })?;
            let target = foreign_key.foreign_key.as_deref().ok_or_else(|| {
                Error::structural(format!("Column is not a foreign key: {foreign_key_column}"))
            })?;
            let (target, target_config) = self
                .schema
                .cohort_tables
                .get_key_value(target)
                .or_else(|| self.schema.metadata_tables.get_key_value(target))
                .ok_or_else(|| Error::structural(format!("Table not found: {target}")))?;
            let primary_key = target_config.primary_key().ok_or_else(|| {
                Error::structural(format!("Table {target} lacks a primary key"))
            })?;

            self.joins.push(JoinedTable {
                alias: to_alias(&path_parts[..end]),
                table: target.clone(),
                primary_key: primary_key.name.clone(),
                from_alias,
                from_column: foreign_key_column,
                before_limit,
            });
            table_name = target.as_str();
            table_index = Some(self.joins.len() - 1);
        }
        Ok((table_name, table_index))
    }

    fn join_index(&self, alias: &str) -> Option<usize> {
        self.joins.iter().position(|j| j.alias == alias)
    }

    fn table_name_of(&self, index: usize) -> Result<&'a str> {
        let table = &self.joins[index].table;
        self.schema
            .cohort_tables
            .get_key_value(table)
            .or_else(|| self.schema.metadata_tables.get_key_value(table))
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| Error::structural(format!("Table not found: {table}")))
    }
}

fn to_alias(parts: &[&str]) -> String {
    parts.join(ALIAS_SEPARATOR)
}

/// `table.column` → `table_column`.
pub(super) fn column_alias(qualified: &str) -> String {
    qualified.replace(TABLE_SEPARATOR, ALIAS_SEPARATOR)
}

#[cfg(test)]
pub(super) mod test_schema {
    use crate::model::SchemaConfig;

    pub const SCHEMA: &str = r#"{
        "cohortTables": {
            "person": {"columns": [
                {"name": "person_id", "type": "integer", "primaryKey": true},
                {"name": "gender_concept_id", "type": "integer", "foreignKey": "concept"},
                {"name": "year_of_birth", "type": "integer"},
                {"name": "birth_datetime", "type": "timestamp"}
            ]},
            "observation": {"columns": [
                {"name": "observation_id", "type": "integer", "primaryKey": true},
                {"name": "person_id", "type": "integer", "foreignKey": "person"},
                {"name": "observation_concept_id", "type": "integer", "foreignKey": "concept", "domainConcept": "standard"},
                {"name": "observation_source_concept_id", "type": "integer", "foreignKey": "concept", "domainConcept": "source"},
                {"name": "observation_date", "type": "date"},
                {"name": "value_as_number", "type": "float"},
                {"name": "value_as_string", "type": "string"}
            ]}
        },
        "metadataTables": {
            "concept": {"columns": [
                {"name": "concept_id", "type": "integer", "primaryKey": true},
                {"name": "concept_name", "type": "string"},
                {"name": "vocabulary_id", "type": "string", "foreignKey": "vocabulary"}
            ]},
            "vocabulary": {"columns": [
                {"name": "vocabulary_id", "type": "string", "primaryKey": true},
                {"name": "vocabulary_name", "type": "string"}
            ]}
        }
    }"#;

    pub fn schema() -> SchemaConfig {
        SchemaConfig::from_json(SCHEMA).unwrap()
    }
}
