//! Cohort query compiler
//!
//! Turns declarative cohort criteria into parameterized BigQuery Standard SQL:
//!
//! ```text
//! SearchRequest
//!      |
//! Criteria assembler  (include / exclude groups, explicit ids, data filters)
//!      |
//! Group compiler      (OR of items, temporal correlation)
//!      |
//! Temporal shaper + modifiers
//!      |
//! Domain leaf compilers -> Query -> SQL text + named parameters
//! ```
//!
//! Field sets compile separately into paged result queries, and
//! [`PaginationToken`]s let clients resume them statelessly.

pub mod bind;
pub mod config;
pub mod criteria;
pub mod error;
pub mod field_set;
pub mod job;
pub mod materialize;
pub mod model;
pub mod pagination;
pub mod sql;
mod validate;

// Re-export main types
pub use bind::{BindValue, NamedParameter, ParameterBinder};
pub use config::CohortConfig;
pub use criteria::CohortQueryBuilder;
pub use error::{BadRequestReason, Error, Result};
pub use field_set::{FieldSetQuery, FieldSetQueryBuilder, OutputColumn};
pub use job::QueryJob;
pub use materialize::{CohortMaterializer, MaterializePlan, MaterializeRequest, Page, QueryExecutor, Row};
pub use pagination::{parameter_hash, PaginationToken};
