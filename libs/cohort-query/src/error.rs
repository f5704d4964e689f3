//! Error types for cohort query compilation

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Sub-reason attached to every rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadRequestReason {
    /// Missing field, empty list, or both/neither of exclusive fields set.
    Structural,
    /// Unrecognized domain, type, subtype, operator, mention or time value.
    Enumeration,
    /// Wrong operand count for an operator.
    Arity,
    /// Operand or column type mismatch.
    Type,
    /// Temporal group items not partitioned into exactly `{0, 1}`.
    TemporalGroup,
    /// Pagination token rejected.
    Cursor,
}

impl BadRequestReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Enumeration => "enumeration",
            Self::Arity => "arity",
            Self::Type => "type",
            Self::TemporalGroup => "temporal-group",
            Self::Cursor => "cursor",
        }
    }
}

impl fmt::Display for BadRequestReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bad request ({reason}): {message}")]
    BadRequest {
        reason: BadRequestReason,
        message: String,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Query execution failed: {0}")]
    Execution(String),
}

impl Error {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::bad_request(BadRequestReason::Structural, message)
    }

    pub fn enumeration(message: impl Into<String>) -> Self {
        Self::bad_request(BadRequestReason::Enumeration, message)
    }

    pub fn arity(message: impl Into<String>) -> Self {
        Self::bad_request(BadRequestReason::Arity, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::bad_request(BadRequestReason::Type, message)
    }

    pub fn temporal_group(message: impl Into<String>) -> Self {
        Self::bad_request(BadRequestReason::TemporalGroup, message)
    }

    pub fn cursor(message: impl Into<String>) -> Self {
        Self::bad_request(BadRequestReason::Cursor, message)
    }

    fn bad_request(reason: BadRequestReason, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(reason = %reason, "{}", message);
        Self::BadRequest { reason, message }
    }

    /// Sub-reason for bad requests; `None` for JSON and execution failures.
    pub fn reason(&self) -> Option<BadRequestReason> {
        match self {
            Self::BadRequest { reason, .. } => Some(*reason),
            Self::Json(_) | Self::Execution(_) => None,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. } | Self::Json(_))
    }
}

/// Message for an invalid field value, naming the owning object and field.
pub(crate) fn not_valid(object: &str, field: &str, value: impl fmt::Debug) -> String {
    format!("Bad Request: {object} {field} \"{value:?}\" is not valid.")
}
