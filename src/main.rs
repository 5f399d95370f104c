use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ecs_schema::{
    compile::{self, CompileConfig},
    fetch::{self, FetchConfig, RetryPolicy, ECS_CSV_URL},
    schema::InferenceOptions,
    sql::TableOptions,
    views::{FieldTable, MaterializedViews},
};
use reqwest::Client;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "ecs-schema")]
#[command(about = "Fetch the Elastic Common Schema field list and compile it for PostgreSQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the field list, archiving the previous copy if it changed
    Fetch {
        #[arg(long, env = "ECS_URL", default_value = ECS_CSV_URL)]
        url: Url,
        #[arg(long, env = "ECS_DEST", default_value = "data/Elastic/ecs.csv")]
        dest: PathBuf,
        /// Rotate even if the download matches the local copy
        #[arg(long, env = "ECS_FORCE")]
        force: bool,
        #[arg(long, env = "ECS_RETRIES", default_value_t = 3)]
        retries: u32,
        #[arg(long, env = "ECS_BACKOFF_MS", default_value_t = 500)]
        backoff_ms: u64,
    },
    /// Generate the SQL load script from one or more field lists
    Compile {
        #[arg(long = "input", env = "ECS_INPUT", value_delimiter = ',', default_value = "data/Elastic/ecs.csv")]
        inputs: Vec<PathBuf>,
        #[arg(long, env = "ECS_OUTPUT", default_value = "data/Elastic/DDL-ecs.sql")]
        output: PathBuf,
        #[command(flatten)]
        target: Target,
        #[arg(long, env = "ECS_OWNER")]
        owner: Option<String>,
        /// Rows per INSERT statement
        #[arg(long, env = "ECS_BATCH_SIZE", default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: u64,
        /// Characters added to the longest observed value for varchar columns
        #[arg(long, env = "ECS_TEXT_MARGIN", default_value_t = 8)]
        text_margin: usize,
        /// Widest varchar before falling back to text
        #[arg(long, env = "ECS_MAX_VARCHAR", default_value_t = 1024)]
        max_varchar: usize,
        /// Recreate and refresh the materialized views in the same script
        #[arg(long, env = "ECS_WITH_VIEWS")]
        with_views: bool,
        /// Skip the unique key and one-of checks
        #[arg(long, env = "ECS_NO_CONSTRAINTS")]
        no_constraints: bool,
    },
    /// Write the materialized view definitions as a standalone script
    Views {
        #[arg(long, env = "ECS_VIEWS_OUTPUT", default_value = "data/Elastic/views-ecs.sql")]
        output: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    /// Load field lists, refresh the views in memory and print them as JSON
    Summary {
        #[arg(long = "input", env = "ECS_INPUT", value_delimiter = ',', default_value = "data/Elastic/ecs.csv")]
        inputs: Vec<PathBuf>,
    },
}

#[derive(Args)]
struct Target {
    #[arg(long, env = "ECS_SCHEMA", default_value = "ecs")]
    schema: String,
    #[arg(long, env = "ECS_TABLE", default_value = "elastic_log_schema")]
    table: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            url,
            dest,
            force,
            retries,
            backoff_ms,
        } => {
            let cfg = FetchConfig {
                url,
                dest,
                force,
                retry: RetryPolicy {
                    max_retries: retries,
                    initial_backoff_ms: backoff_ms,
                },
            };
            let client = Client::builder()
                .user_agent(concat!("ecs-schema/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("building HTTP client")?;
            let outcome = fetch::fetch(&client, &cfg)
                .await
                .with_context(|| format!("fetching {} into {}", cfg.url, cfg.dest.display()))?;
            info!(?outcome, "fetch complete");
        }
        Commands::Compile {
            inputs,
            output,
            target,
            owner,
            batch_size,
            text_margin,
            max_varchar,
            with_views,
            no_constraints,
        } => {
            let cfg = CompileConfig {
                inputs,
                output,
                table: TableOptions {
                    schema: target.schema,
                    table: target.table,
                    owner,
                    batch_size: batch_size as usize,
                    inference: InferenceOptions {
                        text_margin,
                        max_varchar,
                    },
                    constraints: !no_constraints,
                    with_views,
                },
            };
            let script = compile::compile(&cfg)
                .with_context(|| format!("compiling {}", cfg.output.display()))?;
            for c in &script.conflicts {
                info!(column = %c.column, line = c.line, reason = %c.reason, "column widened");
            }
        }
        Commands::Views { output, target } => {
            compile::write_views(&output, &target.schema, &target.table)
                .with_context(|| format!("writing {}", output.display()))?;
            info!(output = %output.display(), "views written");
        }
        Commands::Summary { inputs } => {
            let table = FieldTable::load(&inputs).context("loading field lists")?;
            let mut views = MaterializedViews::new();
            views.refresh(&table).context("refreshing views")?;
            let summary = json!({
                "schema_versions": views.schema_versions()?,
                "schema_versions_fields": views.schema_versions_fields()?,
                "schema_versions_levels": views.schema_versions_levels()?,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
