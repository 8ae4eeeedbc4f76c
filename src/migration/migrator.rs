// ABOUTME: Run context owning the migration transaction
// ABOUTME: Copies tables one by one and verifies counts before commit or rollback

use crate::config::{ColumnPolicy, MigrationSettings, TableRule};
use crate::migration::copy::{build_insert_sql, plan_copy, CopyPlan};
use crate::migration::report::{TableFailure, TableOutcome};
use crate::migration::schema::{SchemaCatalog, TableLayout};
use crate::migration::verify::{verify_counts, Verification};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tokio_postgres::{Client, Transaction};

/// Everything one migration run needs, passed explicitly instead of held globally
///
/// Owns the single transaction of the run. Dropping a `Migrator` without
/// calling [`Migrator::commit`] rolls every copied table back.
pub struct Migrator<'a> {
    tx: Transaction<'a>,
    source: SchemaCatalog,
    target: SchemaCatalog,
    column_policy: ColumnPolicy,
    rules: HashMap<String, TableRule>,
}

impl<'a> Migrator<'a> {
    /// Open the run transaction and load both schema catalogs
    pub async fn begin(
        client: &'a mut Client,
        settings: &MigrationSettings,
        rules: HashMap<String, TableRule>,
    ) -> Result<Self> {
        let tx = client
            .transaction()
            .await
            .context("Failed to begin migration transaction")?;

        let source = SchemaCatalog::load(&tx, &settings.source_schema).await?;
        let target = SchemaCatalog::load(&tx, &settings.target_schema).await?;

        Ok(Self::with_catalogs(tx, source, target, settings.column_policy, rules))
    }

    /// Open the run transaction, looking up only the named tables
    pub async fn begin_for_tables(
        client: &'a mut Client,
        settings: &MigrationSettings,
        rules: HashMap<String, TableRule>,
        tables: &[String],
    ) -> Result<Self> {
        let tx = client
            .transaction()
            .await
            .context("Failed to begin migration transaction")?;

        let source = SchemaCatalog::load_tables(&tx, &settings.source_schema, tables).await?;
        let target = SchemaCatalog::load_tables(&tx, &settings.target_schema, tables).await?;

        Ok(Self::with_catalogs(tx, source, target, settings.column_policy, rules))
    }

    fn with_catalogs(
        tx: Transaction<'a>,
        source: SchemaCatalog,
        target: SchemaCatalog,
        column_policy: ColumnPolicy,
        rules: HashMap<String, TableRule>,
    ) -> Self {
        Self {
            tx,
            source,
            target,
            column_policy,
            rules,
        }
    }

    pub fn table_layout(&self, table: &str) -> TableLayout {
        TableLayout::resolve(table, &self.source, &self.target)
    }

    /// Copy one table from the source schema into the target schema
    ///
    /// Skips and per-table failures come back as `Ok(outcome)`. A failing
    /// insert is rolled back to the table's savepoint so the run can go on.
    /// `Err` is reserved for problems with the connection or the transaction
    /// itself, which end the run.
    pub async fn migrate_table(&mut self, table: &str) -> Result<TableOutcome> {
        let layout = self.table_layout(table);
        let rule = self.rules.get(table).cloned().unwrap_or_default();

        let (columns, dropped) = match plan_copy(&layout, &rule, self.column_policy) {
            CopyPlan::Skip(outcome) => {
                log_skip(table, &outcome, &self.source, &self.target);
                return Ok(outcome);
            }
            CopyPlan::Fail(reason) => {
                tracing::warn!("  ⚠ {}: {}", table, reason);
                return Ok(TableOutcome::Failed { reason });
            }
            CopyPlan::Copy { columns, dropped } => (columns, dropped),
        };

        if !dropped.is_empty() {
            tracing::warn!(
                "  ⚠ {}: column(s) not copied: {}",
                table,
                dropped.join(", ")
            );
        }

        let sql = build_insert_sql(
            self.source.schema(),
            self.target.schema(),
            table,
            &columns,
            &rule.conflict_target,
        );
        tracing::debug!("{}", sql);

        let savepoint = self
            .tx
            .savepoint("copy_table")
            .await
            .context("Failed to create savepoint for table copy")?;

        match savepoint.execute(sql.as_str(), &[]).await {
            Ok(rows) => {
                savepoint
                    .commit()
                    .await
                    .with_context(|| format!("Failed to release savepoint for {}", table))?;
                tracing::info!("  ✓ {}: {} row(s) migrated", table, rows);
                Ok(TableOutcome::Migrated {
                    rows,
                    dropped_columns: dropped,
                })
            }
            Err(e) if e.is_closed() => {
                Err(e).with_context(|| format!("Connection lost while copying {}", table))
            }
            Err(e) => {
                tracing::error!("  ✗ {}: {}", table, e);
                savepoint
                    .rollback()
                    .await
                    .with_context(|| format!("Failed to roll back savepoint for {}", table))?;
                Ok(TableOutcome::Failed {
                    reason: TableFailure::Database {
                        message: database_error_message(&e),
                    },
                })
            }
        }
    }

    /// Compare row counts for the given tables within this transaction
    pub async fn verify_all(&mut self, tables: &[String]) -> Result<Verification> {
        verify_counts(&mut self.tx, &self.source, &self.target, tables).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit migration transaction")
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back migration transaction")
    }
}

fn log_skip(table: &str, outcome: &TableOutcome, source: &SchemaCatalog, target: &SchemaCatalog) {
    match outcome {
        TableOutcome::SkippedMissingTarget => {
            tracing::info!("  ⏭ {}.{} does not exist, skipping", target.schema(), table)
        }
        TableOutcome::SkippedMissingSource => {
            tracing::info!("  ⏭ {}.{} does not exist, skipping", source.schema(), table)
        }
        _ => tracing::info!("  ⏭ {} has no columns, skipping", table),
    }
}

// Prefer the server's message and detail over the driver's generic "db error"
fn database_error_message(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => error.to_string(),
    }
}
