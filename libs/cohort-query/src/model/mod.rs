//! Request and schema types.
//!
//! Everything here is plain data deserialized from camelCase JSON; enum
//! values use their SCREAMING_SNAKE_CASE wire names.

/// Closed set of values with fixed wire names.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::Error;

            fn from_str(s: &str) -> crate::error::Result<Self> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(crate::error::Error::enumeration(format!(
                        "Bad Request: {} \"{}\" is not valid.",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

mod criteria;
mod field_set;
mod schema;

pub use criteria::{
    AgeType, Attribute, AttrName, CriteriaSubType, CriteriaType, Domain, GenderOrSexType, Modifier,
    ModifierType, Operator, ParticipantCriteria, SearchGroup, SearchGroupItem, SearchParameter,
    SearchRequest, TemporalMention, TemporalTime,
};
pub use field_set::{ColumnFilter, ConceptFilter, FieldSet, ResultFilters, TableQuery};
pub use schema::{ColumnConfig, ColumnType, ConceptColumns, SchemaConfig, TableConfig};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;

/// Deserialize a request document.
///
/// Unknown enum values are reported as enumeration errors; every other
/// decoding failure surfaces as [`Error::Json`].
pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|err| {
        let message = err.to_string();
        if message.starts_with("unknown variant") {
            Error::enumeration(message)
        } else {
            Error::Json(err)
        }
    })
}
