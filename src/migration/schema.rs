// ABOUTME: Catalog introspection for source and target schemas
// ABOUTME: Answers table existence and column lists, cached once per run

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tokio_postgres::GenericClient;

/// Check whether `schema.table` exists
pub async fn table_exists<C: GenericClient + Sync>(
    client: &C,
    schema: &str,
    table: &str,
) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = $1::text
                  AND table_name = $2::text
             )",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to check whether {}.{} exists", schema, table))?;

    Ok(row.get(0))
}

/// Column names of `schema.table` in ordinal position order
///
/// Returns an empty list when the table does not exist or has no columns.
pub async fn column_names<C: GenericClient + Sync>(
    client: &C,
    schema: &str,
    table: &str,
) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT column_name::text
             FROM information_schema.columns
             WHERE table_schema = $1::text
               AND table_name = $2::text
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to get columns for {}.{}", schema, table))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Tables and their ordered columns for one schema
///
/// Loaded once at the start of a run. The migration only moves rows, so the
/// catalog cannot change underneath it.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schema: String,
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaCatalog {
    /// Load every table of `schema` with a single catalog query
    pub async fn load<C: GenericClient + Sync>(client: &C, schema: &str) -> Result<Self> {
        let rows = client
            .query(
                "SELECT t.table_name::text, c.column_name::text
                 FROM information_schema.tables t
                 LEFT JOIN information_schema.columns c
                   ON c.table_schema = t.table_schema
                  AND c.table_name = t.table_name
                 WHERE t.table_schema = $1::text
                 ORDER BY t.table_name, c.ordinal_position",
                &[&schema],
            )
            .await
            .with_context(|| format!("Failed to read catalog for schema '{}'", schema))?;

        let mut tables: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in &rows {
            let table: String = row.get(0);
            let column: Option<String> = row.get(1);
            let columns = tables.entry(table).or_default();
            if let Some(column) = column {
                columns.push(column);
            }
        }

        tracing::debug!("Loaded {} table(s) from schema '{}'", tables.len(), schema);

        Ok(Self {
            schema: schema.to_string(),
            tables,
        })
    }

    /// Look up only the named tables, one existence and one column query each
    pub async fn load_tables<C: GenericClient + Sync>(
        client: &C,
        schema: &str,
        names: &[String],
    ) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for name in names {
            if table_exists(client, schema, name).await? {
                tables.insert(name.clone(), column_names(client, schema, name).await?);
            }
        }

        Ok(Self {
            schema: schema.to_string(),
            tables,
        })
    }

    pub fn from_tables<I, T, C>(schema: &str, tables: I) -> Self
    where
        I: IntoIterator<Item = (T, Vec<C>)>,
        T: Into<String>,
        C: Into<String>,
    {
        Self {
            schema: schema.to_string(),
            tables: tables
                .into_iter()
                .map(|(name, columns)| {
                    (name.into(), columns.into_iter().map(Into::into).collect())
                })
                .collect(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(Vec::as_slice)
    }
}

/// One table's columns on both sides, `None` where the table is absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub name: String,
    pub source_columns: Option<Vec<String>>,
    pub target_columns: Option<Vec<String>>,
}

impl TableLayout {
    pub fn resolve(table: &str, source: &SchemaCatalog, target: &SchemaCatalog) -> Self {
        Self {
            name: table.to_string(),
            source_columns: source.columns(table).map(<[String]>::to_vec),
            target_columns: target.columns(table).map(<[String]>::to_vec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postgres::connect;

    #[test]
    fn resolve_marks_absent_tables() {
        let source = SchemaCatalog::from_tables(
            "public",
            vec![("Media", vec!["id", "url", "size"]), ("Task", vec!["id"])],
        );
        let target = SchemaCatalog::from_tables("erp", vec![("Media", vec!["id", "url"])]);

        let media = TableLayout::resolve("Media", &source, &target);
        assert_eq!(
            media.target_columns,
            Some(vec!["id".to_string(), "url".to_string()])
        );

        let task = TableLayout::resolve("Task", &source, &target);
        assert_eq!(task.target_columns, None);
        assert_eq!(task.source_columns, Some(vec!["id".to_string()]));
    }

    #[test]
    fn catalog_keeps_tables_without_columns() {
        let catalog = SchemaCatalog::from_tables("erp", vec![("Empty", Vec::<String>::new())]);
        assert!(catalog.contains("Empty"));
        assert_eq!(catalog.columns("Empty"), Some(&[][..]));
        assert_eq!(catalog.columns("Missing"), None);
        assert_eq!(catalog.schema(), "erp");
    }

    #[tokio::test]
    #[ignore]
    async fn test_catalog_lookups_against_live_database() {
        let url = std::env::var("TEST_DATABASE_URL").unwrap();
        let client = connect(&url).await.unwrap();

        assert!(table_exists(&client, "information_schema", "tables")
            .await
            .unwrap());
        assert!(!table_exists(&client, "public", "definitely_not_a_table")
            .await
            .unwrap());

        let columns = column_names(&client, "information_schema", "tables")
            .await
            .unwrap();
        assert_eq!(columns.first().map(String::as_str), Some("table_catalog"));

        let missing = column_names(&client, "public", "definitely_not_a_table")
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}
