// ABOUTME: Table command implementation - migrate a single table
// ABOUTME: Always strict, any failure rolls the table back

use crate::commands::migrate::{finish, RunOptions};
use crate::config::{CommitPolicy, MigrationSettings, TableRule};
use crate::migration::{
    decide, CommitDecision, MigrationReport, Migrator, RollbackReason, TableOutcome,
};
use crate::postgres;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use tokio_postgres::Config;

/// Migrate one table and verify only that table
///
/// Prints the source, destination and common column lists before copying.
/// A missing table is an error here rather than a skip, since nothing would
/// be migrated.
///
/// # Errors
///
/// Returns an error if the table is missing on either side, the copy fails,
/// the row counts differ, or the connection is lost.
pub async fn migrate_single_table(
    database: &Config,
    settings: &MigrationSettings,
    table: &str,
    rule: TableRule,
    options: &RunOptions,
) -> Result<MigrationReport> {
    crate::utils::validate_postgres_identifier(table)
        .with_context(|| format!("Invalid table name '{}'", table))?;

    tracing::info!("========================================");
    tracing::info!(
        "Migrating {}: {} -> {}",
        table,
        settings.source_schema,
        settings.target_schema
    );
    tracing::info!("========================================");

    let mut client = postgres::connect_with_config(database)
        .await
        .context("Failed to connect to database")?;

    let tables = vec![table.to_string()];
    let mut rules = HashMap::new();
    rules.insert(table.to_string(), rule);

    let mut migrator = Migrator::begin_for_tables(&mut client, settings, rules, &tables).await?;

    let layout = migrator.table_layout(table);
    print_columns("Source", &settings.source_schema, layout.source_columns.as_deref());
    print_columns("Target", &settings.target_schema, layout.target_columns.as_deref());
    if let (Some(source), Some(target)) = (&layout.source_columns, &layout.target_columns) {
        let common: Vec<&str> = target
            .iter()
            .filter(|c| source.contains(c))
            .map(String::as_str)
            .collect();
        println!("Common columns ({}): {}", common.len(), common.join(", "));
    }
    println!();

    let outcome = migrator.migrate_table(table).await?;
    let skipped = match &outcome {
        TableOutcome::SkippedMissingSource => {
            Some(format!("Table {}.{} not found", settings.source_schema, table))
        }
        TableOutcome::SkippedMissingTarget => {
            Some(format!("Table {}.{} not found", settings.target_schema, table))
        }
        TableOutcome::SkippedEmptySchema => Some(format!("Table {} has no columns", table)),
        _ => None,
    };

    let mut report = MigrationReport::new(&settings.source_schema, &settings.target_schema);
    report.record(table, outcome);

    if let Some(message) = skipped {
        migrator.rollback().await?;
        report.decision = Some(CommitDecision::Rollback {
            reason: RollbackReason::NothingMigrated,
        });
        if let Some(path) = &options.report_path {
            report.write_json(path)?;
        }
        tracing::error!("✗ {}. Rollback executed.", message);
        bail!(message);
    }

    let verification = migrator.verify_all(&tables).await?;
    let decision = decide(
        CommitPolicy::Strict,
        &report.failed_tables(),
        verification.passed(),
        options.dry_run,
    );
    report.verification = Some(verification);

    finish(migrator, decision, report, options).await
}

fn print_columns(label: &str, schema: &str, columns: Option<&[String]>) {
    match columns {
        Some(columns) => println!(
            "{} columns in {} ({}): {}",
            label,
            schema,
            columns.len(),
            columns.join(", ")
        ),
        None => println!("{} columns in {}: table not found", label, schema),
    }
}
