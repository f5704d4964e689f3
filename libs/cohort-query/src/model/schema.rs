use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[serde(alias = "STRING")]
    String,
    #[serde(alias = "INTEGER")]
    Integer,
    #[serde(alias = "FLOAT")]
    Float,
    #[serde(alias = "DATE")]
    Date,
    #[serde(alias = "TIMESTAMP")]
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
        })
    }
}

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    /// Table this column references, if it is a foreign key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// `standard` or `source` for the table's concept id columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_concept: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableConfig {
    pub columns: Vec<ColumnConfig>,
}

impl TableConfig {
    pub fn column(&self, name: &str) -> Option<&ColumnConfig> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnConfig> {
        self.columns.iter().find(|c| c.primary_key)
    }

    fn domain_concept(&self, kind: &str) -> Option<&ColumnConfig> {
        self.columns
            .iter()
            .find(|c| c.domain_concept.as_deref() == Some(kind))
    }
}

/// Standard and source concept columns of a cohort table.
#[derive(Debug, Clone, Copy)]
pub struct ConceptColumns<'a> {
    pub standard: &'a ColumnConfig,
    pub source: &'a ColumnConfig,
}

/// Warehouse schema: cohort tables (carry `person_id`) and metadata tables
/// reachable only through foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConfig {
    #[serde(default)]
    pub cohort_tables: BTreeMap<String, TableConfig>,
    #[serde(default)]
    pub metadata_tables: BTreeMap<String, TableConfig>,
}

impl SchemaConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn cohort_table(&self, name: &str) -> Option<&TableConfig> {
        self.cohort_tables.get(name)
    }

    /// Cohort or metadata table.
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.cohort_tables
            .get(name)
            .or_else(|| self.metadata_tables.get(name))
    }

    pub fn concept_columns(&self, table_name: &str) -> Result<ConceptColumns<'_>> {
        let table = self
            .cohort_table(table_name)
            .ok_or_else(|| Error::structural(format!("Table not found: {table_name}")))?;
        let standard = table.domain_concept("standard").ok_or_else(|| {
            Error::structural(format!("Table {table_name} has no standard concept column"))
        })?;
        let source = table.domain_concept("source").ok_or_else(|| {
            Error::structural(format!("Table {table_name} has no source concept column"))
        })?;
        Ok(ConceptColumns { standard, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "cohortTables": {
            "condition_occurrence": {"columns": [
                {"name": "condition_occurrence_id", "type": "integer", "primaryKey": true},
                {"name": "person_id", "type": "integer", "foreignKey": "person"},
                {"name": "condition_concept_id", "type": "integer", "foreignKey": "concept", "domainConcept": "standard"},
                {"name": "condition_source_concept_id", "type": "integer", "foreignKey": "concept", "domainConcept": "source"}
            ]}
        },
        "metadataTables": {
            "concept": {"columns": [
                {"name": "concept_id", "type": "INTEGER", "primaryKey": true},
                {"name": "concept_name", "type": "string"}
            ]}
        }
    }"#;

    #[test]
    fn loads_tables_and_keys() {
        let schema = SchemaConfig::from_json(SCHEMA).unwrap();
        let concept = schema.table("concept").unwrap();
        assert_eq!(concept.primary_key().unwrap().name, "concept_id");
        assert!(schema.cohort_table("concept").is_none());
        let person_id = schema
            .table("condition_occurrence")
            .and_then(|t| t.column("person_id"))
            .unwrap();
        assert_eq!(person_id.foreign_key.as_deref(), Some("person"));
    }

    #[test]
    fn finds_concept_columns() {
        let schema = SchemaConfig::from_json(SCHEMA).unwrap();
        let columns = schema.concept_columns("condition_occurrence").unwrap();
        assert_eq!(columns.standard.name, "condition_concept_id");
        assert_eq!(columns.source.name, "condition_source_concept_id");
        assert!(schema.concept_columns("concept").is_err());
    }
}
