//! Compiler configuration.

use crate::error::{Error, Result};
use crate::sql::is_identifier;
use serde::{Deserialize, Serialize};

/// Warehouse table names and paging limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CohortConfig {
    /// Flat event table every domain leaf reads from.
    pub search_events_table: String,
    /// One row per person with demographics and data-availability flags.
    pub search_person_table: String,
    pub person_table: String,
    /// Event table with display names, used for domain charts.
    pub review_events_table: String,
    pub death_table: String,
    pub criteria_table: String,
    pub criteria_ancestor_table: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            search_events_table: "cb_search_all_events".to_string(),
            search_person_table: "cb_search_person".to_string(),
            person_table: "person".to_string(),
            review_events_table: "cb_review_all_events".to_string(),
            death_table: "death".to_string(),
            criteria_table: "cb_criteria".to_string(),
            criteria_ancestor_table: "cb_criteria_ancestor".to_string(),
            default_page_size: 1000,
            max_page_size: 10000,
        }
    }
}

impl CohortConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, table) in [
            ("search_events_table", &self.search_events_table),
            ("search_person_table", &self.search_person_table),
            ("person_table", &self.person_table),
            ("review_events_table", &self.review_events_table),
            ("death_table", &self.death_table),
            ("criteria_table", &self.criteria_table),
            ("criteria_ancestor_table", &self.criteria_ancestor_table),
        ] {
            if !is_identifier(table) {
                return Err(Error::structural(format!(
                    "{key} must be a lowercase table name, got \"{table}\""
                )));
            }
        }
        if self.default_page_size == 0 {
            return Err(Error::structural("default_page_size must be positive"));
        }
        if self.default_page_size > self.max_page_size {
            return Err(Error::structural(
                "default_page_size must not exceed max_page_size",
            ));
        }
        Ok(())
    }

    /// Requested page size, defaulted and clamped to the maximum.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        match requested {
            None | Some(0) => self.default_page_size,
            Some(size) => size.min(self.max_page_size),
        }
    }
}
