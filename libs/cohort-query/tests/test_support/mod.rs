//! Request builders shared by the integration tests.

#![allow(dead_code)]

use cohort_query::model::{from_json, ParticipantCriteria, SchemaConfig, SearchGroup};
use serde_json::{json, Value};

/// A condition code parameter.
pub fn condition(concept_id: i64, group: bool) -> Value {
    json!({
        "domain": "CONDITION",
        "type": "SNOMED",
        "conceptId": concept_id,
        "group": group,
        "standard": true
    })
}

/// A condition item, optionally on a temporal side.
pub fn item(concept_id: i64, temporal_group: Option<i32>) -> Value {
    let mut item = json!({"type": "CONDITION", "searchParameters": [condition(concept_id, false)]});
    if let Some(side) = temporal_group {
        item["temporalGroup"] = json!(side);
    }
    item
}

pub fn group(items: Vec<Value>) -> SearchGroup {
    from_json(&json!({"items": items}).to_string()).unwrap()
}

pub fn temporal_group(items: Vec<Value>, time: &str, time_value: Option<i64>) -> SearchGroup {
    let mut group = json!({"items": items, "temporal": true, "mention": "ANY_MENTION", "time": time});
    if let Some(days) = time_value {
        group["timeValue"] = json!(days);
    }
    from_json(&group.to_string()).unwrap()
}

pub fn search(includes: Vec<SearchGroup>, excludes: Vec<SearchGroup>) -> ParticipantCriteria {
    ParticipantCriteria::search(cohort_query::model::SearchRequest {
        includes,
        excludes,
        data_filters: Vec::new(),
    })
}

pub const SCHEMA: &str = r#"{
    "cohortTables": {
        "person": {"columns": [
            {"name": "person_id", "type": "integer", "primaryKey": true},
            {"name": "gender_concept_id", "type": "integer", "foreignKey": "concept"},
            {"name": "year_of_birth", "type": "integer"}
        ]},
        "condition_occurrence": {"columns": [
            {"name": "condition_occurrence_id", "type": "integer", "primaryKey": true},
            {"name": "person_id", "type": "integer", "foreignKey": "person"},
            {"name": "condition_concept_id", "type": "integer", "foreignKey": "concept", "domainConcept": "standard"},
            {"name": "condition_source_concept_id", "type": "integer", "foreignKey": "concept", "domainConcept": "source"},
            {"name": "condition_start_date", "type": "date"},
            {"name": "condition_start_datetime", "type": "timestamp"},
            {"name": "stop_reason", "type": "string"}
        ]}
    },
    "metadataTables": {
        "concept": {"columns": [
            {"name": "concept_id", "type": "integer", "primaryKey": true},
            {"name": "concept_name", "type": "string"},
            {"name": "vocabulary_id", "type": "string"}
        ]}
    }
}"#;

pub fn schema() -> SchemaConfig {
    SchemaConfig::from_json(SCHEMA).unwrap()
}
