//! Executable query handed to the warehouse.

use crate::bind::{BindValue, NamedParameter, ParameterBinder};
use crate::sql::Query;
use serde::Serialize;

/// SQL text plus its named parameters. The SQL still contains the
/// `${projectId}` and `${dataSetId}` tokens; resolving them is the
/// executor's job.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryJob {
    pub sql: String,
    pub named_parameters: Vec<NamedParameter>,
    pub use_legacy_sql: bool,
}

impl QueryJob {
    pub fn new(query: &Query, binder: ParameterBinder) -> Self {
        Self::from_sql(query.render(), binder)
    }

    pub fn from_sql(sql: String, binder: ParameterBinder) -> Self {
        let job = Self {
            sql,
            named_parameters: binder.into_parameters(),
            use_legacy_sql: false,
        };
        tracing::debug!(
            parameters = job.named_parameters.len(),
            sql_len = job.sql.len(),
            "Built query job"
        );
        job
    }

    /// Bound value for a placeholder (`@p0`) or parameter name (`p0`).
    pub fn parameter(&self, name: &str) -> Option<&BindValue> {
        let name = name.trim_start_matches('@');
        self.named_parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// BigQuery REST `configuration` object for a named-parameter query job.
    pub fn to_configuration(&self) -> serde_json::Value {
        let config = JobConfiguration {
            query: QueryConfiguration {
                query: &self.sql,
                use_legacy_sql: self.use_legacy_sql,
                parameter_mode: "NAMED",
                query_parameters: self.named_parameters.iter().map(QueryParameter::from).collect(),
            },
        };
        serde_json::to_value(config).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize)]
struct JobConfiguration<'a> {
    query: QueryConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryConfiguration<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter<'a> {
    name: &'a str,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    type_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValue>>,
}

impl<'a> From<&'a NamedParameter> for QueryParameter<'a> {
    fn from(param: &'a NamedParameter) -> Self {
        let (parameter_type, parameter_value) = match &param.value {
            BindValue::Array(array) => (
                ParameterType {
                    type_name: "ARRAY",
                    array_type: Some(Box::new(ParameterType {
                        type_name: array.element_type(),
                        array_type: None,
                    })),
                },
                ParameterValue {
                    value: None,
                    array_values: Some(
                        array
                            .to_strings()
                            .into_iter()
                            .map(|v| ParameterValue {
                                value: Some(v),
                                array_values: None,
                            })
                            .collect(),
                    ),
                },
            ),
            scalar => (
                ParameterType {
                    type_name: scalar_type(scalar),
                    array_type: None,
                },
                ParameterValue {
                    value: scalar.scalar_string(),
                    array_values: None,
                },
            ),
        };
        Self {
            name: &param.name,
            parameter_type,
            parameter_value,
        }
    }
}

fn scalar_type(value: &BindValue) -> &'static str {
    match value {
        BindValue::Int64(_) => "INT64",
        BindValue::Float64(_) => "FLOAT64",
        BindValue::String(_) => "STRING",
        BindValue::Bool(_) => "BOOL",
        BindValue::Date(_) => "DATE",
        BindValue::Timestamp(_) => "TIMESTAMP",
        BindValue::Array(_) => "ARRAY",
    }
}
