// ABOUTME: Row-count verification between source and target schemas
// ABOUTME: Compares table cardinality inside the run's transaction

use crate::migration::schema::SchemaCatalog;
use crate::utils::quote_qualified;
use anyhow::{Context, Result};
use serde::Serialize;
use tokio_postgres::{GenericClient, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub source_rows: i64,
    pub target_rows: i64,
}

impl TableCount {
    pub fn matches(&self) -> bool {
        self.source_rows == self.target_rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountError {
    pub table: String,
    pub message: String,
}

/// Outcome of comparing row counts across the plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub counts: Vec<TableCount>,
    pub errors: Vec<CountError>,
}

impl Verification {
    /// True only if every compared table matches and no count failed
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && self.counts.iter().all(TableCount::matches)
    }

    pub fn mismatches(&self) -> Vec<&TableCount> {
        self.counts.iter().filter(|c| !c.matches()).collect()
    }
}

/// Count the rows of `schema.table`
pub async fn count_rows<C: GenericClient + Sync>(
    client: &C,
    schema: &str,
    table: &str,
) -> Result<i64, tokio_postgres::Error> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_qualified(schema, table));
    let row = client.query_one(&sql, &[]).await?;
    Ok(row.get(0))
}

/// Compare row counts for every table present in both schemas
///
/// Tables missing from either side are left out, matching the copy step which
/// skips them. Each table is counted inside its own savepoint so a failing
/// count is recorded without poisoning the surrounding transaction; only a
/// lost connection aborts.
pub async fn verify_counts(
    tx: &mut Transaction<'_>,
    source: &SchemaCatalog,
    target: &SchemaCatalog,
    tables: &[String],
) -> Result<Verification> {
    tracing::info!("");
    tracing::info!("========================================");
    tracing::info!("Verifying row counts");
    tracing::info!("========================================");

    let mut verification = Verification::default();

    for table in tables {
        if !source.contains(table) || !target.contains(table) {
            continue;
        }

        let savepoint = tx
            .savepoint("verify_count")
            .await
            .context("Failed to create savepoint for row count")?;

        let counted = async {
            let source_rows = count_rows(&savepoint, source.schema(), table).await?;
            let target_rows = count_rows(&savepoint, target.schema(), table).await?;
            Ok::<_, tokio_postgres::Error>((source_rows, target_rows))
        }
        .await;

        match counted {
            Ok((source_rows, target_rows)) => {
                savepoint
                    .commit()
                    .await
                    .context("Failed to release row count savepoint")?;

                let count = TableCount {
                    table: table.clone(),
                    source_rows,
                    target_rows,
                };
                if count.matches() {
                    tracing::info!(
                        "✓ {:30} | {}: {:>8} | {}: {:>8}",
                        table,
                        source.schema(),
                        source_rows,
                        target.schema(),
                        target_rows
                    );
                } else {
                    tracing::error!(
                        "✗ {:30} | {}: {:>8} | {}: {:>8}",
                        table,
                        source.schema(),
                        source_rows,
                        target.schema(),
                        target_rows
                    );
                }
                verification.counts.push(count);
            }
            Err(e) if e.is_closed() => {
                return Err(e).context("Connection lost during verification");
            }
            Err(e) => {
                tracing::error!("✗ {:30} | count failed: {}", table, e);
                savepoint
                    .rollback()
                    .await
                    .context("Failed to roll back row count savepoint")?;
                verification.errors.push(CountError {
                    table: table.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(verification)
}
