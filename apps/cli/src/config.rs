//! CLI configuration.
//!
//! Layered, later sources win:
//! 1. built-in defaults
//! 2. `cohort.toml` (or the file passed with `--config`), if present
//! 3. `COHORT__*` environment variables, e.g. `COHORT__LOGGING__LEVEL=debug`
//!    or `COHORT__COHORT__MAX_PAGE_SIZE=500`
//!
//! A `.env` file in the working directory is loaded into the environment first.

use anyhow::Context;
use cohort_query::CohortConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "cohort.toml";
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub cohort: CohortConfig,
    /// Warehouse schema used by `materialize` when `--schema` is not given.
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("COHORT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            anyhow::bail!(
                "logging.level must be one of {}, got \"{}\"",
                LEVELS.join(", "),
                self.logging.level
            );
        }
        self.cohort.validate()?;
        Ok(())
    }
}
