// ABOUTME: CLI entry point for schema-migrator
// ABOUTME: Parses commands, resolves configuration, and routes to handlers

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use schema_migrator::commands::{self, RunOptions};
use schema_migrator::config::{self, ColumnPolicy, CommitPolicy, MigrationSettings, MigratorConfig};
use schema_migrator::utils;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "schema-migrator")]
#[command(
    about = "Copy rows between PostgreSQL schemas in dependency order, inside one transaction",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<String>,
    /// Connection URL (overrides DATABASE_URL and the config file)
    #[arg(long)]
    url: Option<String>,
    /// Schema to read rows from
    #[arg(long)]
    source_schema: Option<String>,
    /// Schema to write rows into
    #[arg(long)]
    target_schema: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// How to treat source columns missing from the destination
    #[arg(long, value_enum)]
    column_policy: Option<ColumnPolicy>,
    /// Run everything, then roll back
    #[arg(long)]
    dry_run: bool,
    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,
    /// Write a JSON report of the run to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every table in the plan, verify row counts, then commit
    Migrate {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Whether per-table failures still allow a commit
        #[arg(long, value_enum)]
        commit_policy: Option<CommitPolicy>,
    },
    /// Copy a single table, rolling back on any failure
    Table {
        /// Table to migrate
        #[arg(long)]
        name: String,
        /// Copy exactly these columns (comma-separated)
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        /// Columns for ON CONFLICT (comma-separated)
        #[arg(long, value_delimiter = ',')]
        conflict_target: Option<Vec<String>>,
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Compare row counts between the schemas without writing
    Verify {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Print the resolved copy order
    Plan {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            connection,
            run,
            commit_policy,
        } => {
            let config = load_config(connection.config.as_deref())?;
            let mut settings = settings_from(&config, &connection, &run)?;
            if let Some(policy) = commit_policy {
                settings.commit_policy = policy;
            }
            let database = resolve_connection(&connection, &config)?;
            let plan = config.plan()?;

            commands::migrate(&database, &settings, &plan, config.table_rules(), &run_options(run))
                .await
                .map(|_| ())
        }
        Commands::Table {
            name,
            columns,
            conflict_target,
            connection,
            run,
        } => {
            let config = load_config(connection.config.as_deref())?;
            let settings = settings_from(&config, &connection, &run)?;
            let database = resolve_connection(&connection, &config)?;

            let mut rule = config.table_rules().remove(&name).unwrap_or_default();
            if let Some(columns) = columns {
                for column in &columns {
                    utils::validate_postgres_identifier(column)
                        .with_context(|| format!("Invalid column '{}'", column))?;
                }
                rule.columns = Some(columns);
            }
            if let Some(conflict_target) = conflict_target {
                for column in &conflict_target {
                    utils::validate_postgres_identifier(column)
                        .with_context(|| format!("Invalid conflict target column '{}'", column))?;
                }
                rule.conflict_target = conflict_target;
            }

            commands::migrate_single_table(&database, &settings, &name, rule, &run_options(run))
                .await
                .map(|_| ())
        }
        Commands::Verify { connection } => {
            let config = load_config(connection.config.as_deref())?;
            let settings = apply_schema_overrides(config.migration.clone(), &connection)?;
            let database = resolve_connection(&connection, &config)?;
            let plan = config.plan()?;

            commands::verify(&database, &settings, &plan).await.map(|_| ())
        }
        Commands::Plan { config } => {
            let config = load_config(config.as_deref())?;
            commands::show_plan(&config.plan()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&str>) -> Result<MigratorConfig> {
    match path {
        Some(path) => config::load_config_from_file(path),
        None => Ok(MigratorConfig::default()),
    }
}

fn apply_schema_overrides(
    mut settings: MigrationSettings,
    connection: &ConnectionArgs,
) -> Result<MigrationSettings> {
    if let Some(schema) = &connection.source_schema {
        settings.source_schema = schema.clone();
    }
    if let Some(schema) = &connection.target_schema {
        settings.target_schema = schema.clone();
    }
    config::validate_schemas(&settings)?;
    Ok(settings)
}

fn settings_from(
    config: &MigratorConfig,
    connection: &ConnectionArgs,
    run: &RunArgs,
) -> Result<MigrationSettings> {
    let mut settings = apply_schema_overrides(config.migration.clone(), connection)?;
    if let Some(policy) = run.column_policy {
        settings.column_policy = policy;
    }
    Ok(settings)
}

fn resolve_connection(
    connection: &ConnectionArgs,
    config: &MigratorConfig,
) -> Result<tokio_postgres::Config> {
    let env_url = std::env::var("DATABASE_URL").ok();
    config::resolve_database(connection.url.as_deref(), env_url.as_deref(), config)
}

fn run_options(run: RunArgs) -> RunOptions {
    RunOptions {
        dry_run: run.dry_run,
        assume_yes: run.yes,
        report_path: run.report,
    }
}
