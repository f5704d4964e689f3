//! cohort-cli - compile cohort criteria and field sets into BigQuery jobs.
//!
//! Requests are read as JSON from files (`-` for stdin). Compiled jobs are
//! printed as BigQuery REST `configuration` objects.

mod config;
mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cohort_query::model::{
    from_json, AgeType, Domain, GenderOrSexType, ParticipantCriteria, SchemaConfig,
};
use cohort_query::{CohortQueryBuilder, MaterializePlan, MaterializeRequest, PaginationToken, QueryJob};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "cohort-cli", version, about = "Cohort query compiler")]
struct Cli {
    /// Configuration file (defaults to ./cohort.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile participant criteria into a participant-level query
    Compile {
        #[command(subcommand)]
        query: CompileQuery,
    },
    /// Compile one page of a field-set materialization
    Materialize {
        /// MaterializeRequest JSON
        request: PathBuf,
        /// Warehouse schema JSON (overrides `schema_path`)
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Inspect or mint pagination tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum CompileQuery {
    /// Number of matching participants
    Count { criteria: PathBuf },
    /// Ids of participants matching any of the criteria files
    Ids {
        #[arg(required = true)]
        criteria: Vec<PathBuf>,
    },
    /// Random sample of matching participants
    Random {
        criteria: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Counts by gender (or sex at birth), race and age range
    DemoChart {
        criteria: PathBuf,
        #[arg(long, default_value = "GENDER")]
        gender_or_sex: GenderOrSexType,
        #[arg(long, default_value = "AGE")]
        age_type: AgeType,
    },
    /// Most frequent concepts of a domain
    DomainChart {
        criteria: PathBuf,
        #[arg(long)]
        domain: Domain,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Encode an offset and parameter hash
    Encode {
        #[arg(long)]
        offset: i64,
        #[arg(long)]
        hash: String,
    },
    /// Decode a token into its offset and parameter hash
    Decode { token: String },
    /// Parameter hash of a MaterializeRequest
    Hash { request: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Command::Compile { query } => {
            let job = compile(&config, query)?;
            print_json(&job.to_configuration())
        }
        Command::Materialize { request, schema } => {
            let schema_path = schema
                .or_else(|| config.schema_path.clone())
                .context("No warehouse schema: pass --schema or set schema_path")?;
            let schema = SchemaConfig::from_json(&read_input(&schema_path)?)
                .with_context(|| format!("Invalid schema {}", schema_path.display()))?;
            let request: MaterializeRequest = from_json(&read_input(&request)?)?;
            let plan = MaterializePlan::build(&config.cohort, &schema, &request)?;
            print_json(&plan_output(&plan))
        }
        Command::Token { action } => match action {
            TokenAction::Encode { offset, hash } => {
                println!("{}", PaginationToken::new(offset, hash).encode());
                Ok(())
            }
            TokenAction::Decode { token } => {
                let token = PaginationToken::decode(&token)?;
                print_json(&json!({
                    "offset": token.offset,
                    "parameterHash": token.parameter_hash,
                }))
            }
            TokenAction::Hash { request } => {
                let request: MaterializeRequest = from_json(&read_input(&request)?)?;
                println!("{}", request.parameter_hash()?);
                Ok(())
            }
        },
    }
}

fn compile(config: &config::Config, query: CompileQuery) -> anyhow::Result<QueryJob> {
    let builder = CohortQueryBuilder::new(&config.cohort);
    let job = match query {
        CompileQuery::Count { criteria } => builder.participant_count(&read_criteria(&criteria)?)?,
        CompileQuery::Ids { criteria } => {
            let criteria = criteria
                .iter()
                .map(|path| read_criteria(path))
                .collect::<anyhow::Result<Vec<_>>>()?;
            builder.unioned_participant_ids(&criteria)?
        }
        CompileQuery::Random {
            criteria,
            limit,
            offset,
        } => builder.random_participants(&read_criteria(&criteria)?, limit, offset)?,
        CompileQuery::DemoChart {
            criteria,
            gender_or_sex,
            age_type,
        } => builder.demo_chart(&read_criteria(&criteria)?, gender_or_sex, age_type)?,
        CompileQuery::DomainChart {
            criteria,
            domain,
            limit,
        } => builder.domain_chart(&read_criteria(&criteria)?, domain, limit)?,
    };
    Ok(job)
}

fn plan_output(plan: &MaterializePlan) -> serde_json::Value {
    let Some(query) = &plan.query else {
        return json!({"pageSize": plan.page_size, "offset": plan.offset, "empty": true});
    };
    let columns: Vec<_> = query
        .columns
        .iter()
        .map(|c| json!({"name": c.name, "alias": c.alias, "type": c.column_type.to_string()}))
        .collect();
    json!({
        "pageSize": plan.page_size,
        "offset": plan.offset,
        "columns": columns,
        "configuration": query.job.to_configuration(),
        // Only valid when the page comes back with more than pageSize rows
        "nextPageToken": plan.next_token().encode(),
    })
}

fn read_criteria(path: &Path) -> anyhow::Result<ParticipantCriteria> {
    from_json(&read_input(path)?).with_context(|| format!("Invalid criteria in {}", path.display()))
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
