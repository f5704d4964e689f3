//! Named query parameters.
//!
//! Every literal that reaches the warehouse goes through a [`ParameterBinder`];
//! compiled SQL only ever contains `@pN` placeholders.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Format for timestamp parameter values.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Format for date parameter values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A literal bound to a named placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int64(i64),
    Float64(f64),
    String(String),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Array(ArrayValue),
}

/// Homogeneous array parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    String(Vec<String>),
    Date(Vec<NaiveDate>),
}

impl BindValue {
    /// Warehouse type name (`INT64`, `ARRAY<STRING>`, ...).
    pub fn type_name(&self) -> String {
        match self {
            Self::Int64(_) => "INT64".to_string(),
            Self::Float64(_) => "FLOAT64".to_string(),
            Self::String(_) => "STRING".to_string(),
            Self::Bool(_) => "BOOL".to_string(),
            Self::Date(_) => "DATE".to_string(),
            Self::Timestamp(_) => "TIMESTAMP".to_string(),
            Self::Array(array) => format!("ARRAY<{}>", array.element_type()),
        }
    }

    /// Scalar rendering used in parameter configurations. Arrays render as
    /// `None`; use [`ArrayValue::to_strings`] for their elements.
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Self::Int64(v) => Some(v.to_string()),
            Self::Float64(v) => Some(v.to_string()),
            Self::String(v) => Some(v.clone()),
            Self::Bool(v) => Some(v.to_string()),
            Self::Date(v) => Some(v.format(DATE_FORMAT).to_string()),
            Self::Timestamp(v) => Some(v.format(TIMESTAMP_FORMAT).to_string()),
            Self::Array(_) => None,
        }
    }
}

impl ArrayValue {
    pub fn element_type(&self) -> &'static str {
        match self {
            Self::Int64(_) => "INT64",
            Self::Float64(_) => "FLOAT64",
            Self::String(_) => "STRING",
            Self::Date(_) => "DATE",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Self::Int64(v) => v.iter().map(|x| x.to_string()).collect(),
            Self::Float64(v) => v.iter().map(|x| x.to_string()).collect(),
            Self::String(v) => v.clone(),
            Self::Date(v) => v
                .iter()
                .map(|d| d.format(DATE_FORMAT).to_string())
                .collect(),
        }
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDate> for BindValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<DateTime<Utc>> for BindValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<i64>> for BindValue {
    fn from(value: Vec<i64>) -> Self {
        Self::Array(ArrayValue::Int64(value))
    }
}

impl From<Vec<f64>> for BindValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Array(ArrayValue::Float64(value))
    }
}

impl From<Vec<String>> for BindValue {
    fn from(value: Vec<String>) -> Self {
        Self::Array(ArrayValue::String(value))
    }
}

impl From<Vec<NaiveDate>> for BindValue {
    fn from(value: Vec<NaiveDate>) -> Self {
        Self::Array(ArrayValue::Date(value))
    }
}

/// A bound parameter, name without the leading `@`.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedParameter {
    pub name: String,
    pub value: BindValue,
}

/// Placeholder allocator for one compilation.
///
/// Names are `p0`, `p1`, ... in bind order, so two binders never need to be
/// merged: a query is always compiled against exactly one.
#[derive(Debug, Default)]
pub struct ParameterBinder {
    params: Vec<NamedParameter>,
}

impl ParameterBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` and return its placeholder (`@pN`).
    pub fn bind(&mut self, value: impl Into<BindValue>) -> String {
        let name = format!("p{}", self.params.len());
        let placeholder = format!("@{name}");
        self.params.push(NamedParameter {
            name,
            value: value.into(),
        });
        placeholder
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn parameters(&self) -> &[NamedParameter] {
        &self.params
    }

    /// Look up a bound value by placeholder (`@p3`) or bare name (`p3`).
    pub fn get(&self, placeholder: &str) -> Option<&BindValue> {
        let name = placeholder.trim_start_matches('@');
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    pub fn into_parameters(self) -> Vec<NamedParameter> {
        self.params
    }
}

/// JSON view of a parameter (`{"name": .., "type": .., "value": ..}`).
#[derive(Debug, Serialize)]
pub struct ParameterView<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: serde_json::Value,
}

impl<'a> From<&'a NamedParameter> for ParameterView<'a> {
    fn from(param: &'a NamedParameter) -> Self {
        let value = match &param.value {
            BindValue::Array(array) => serde_json::Value::from(array.to_strings()),
            other => serde_json::Value::from(other.scalar_string().unwrap_or_default()),
        };
        Self {
            name: &param.name,
            type_name: param.value.type_name(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_follow_bind_order() {
        let mut binder = ParameterBinder::new();
        assert_eq!(binder.bind(1_i64), "@p0");
        assert_eq!(binder.bind("ICD9CM"), "@p1");
        assert_eq!(binder.bind(vec![1_i64, 2, 3]), "@p2");
        assert_eq!(binder.len(), 3);
        assert_eq!(binder.get("@p1"), Some(&BindValue::String("ICD9CM".into())));
        assert_eq!(binder.get("p2").map(|v| v.type_name()), Some("ARRAY<INT64>".into()));
    }

    #[test]
    fn independent_binders_do_not_share_names() {
        let mut a = ParameterBinder::new();
        let mut b = ParameterBinder::new();
        a.bind(1_i64);
        a.bind(2_i64);
        assert_eq!(b.bind(3_i64), "@p0");
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn scalar_strings_use_warehouse_formats() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        assert_eq!(
            BindValue::Date(date).scalar_string().as_deref(),
            Some("2020-01-31")
        );
        let ts = date.and_hms_opt(8, 30, 0).unwrap().and_utc();
        assert_eq!(
            BindValue::Timestamp(ts).scalar_string().as_deref(),
            Some("2020-01-31 08:30:00 UTC")
        );
        assert_eq!(BindValue::from(vec![1.5_f64]).scalar_string(), None);
    }

    #[test]
    fn parameter_view_renders_arrays_as_strings() {
        let param = NamedParameter {
            name: "p0".into(),
            value: BindValue::from(vec![10_i64, 20]),
        };
        let json = serde_json::to_value(ParameterView::from(&param)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "p0", "type": "ARRAY<INT64>", "value": ["10", "20"]})
        );
    }
}
