// ABOUTME: Parses the migration configuration file
// ABOUTME: Converts TOML into connection settings, run policies, and the table plan

use crate::plan::{self, MigrationPlan, PlanEntry};
use crate::postgres::connection::{apply_keepalives, parse_connection_string};
use crate::utils;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use tokio_postgres::Config;

/// What to do with the transaction when some tables failed but counts match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    /// Commit anyway and report the failed tables as warnings
    #[default]
    BestEffort,
    /// Roll back everything if any table failed
    Strict,
}

/// How to treat source columns that have no counterpart in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnPolicy {
    /// Copy the common columns and warn about the dropped ones
    #[default]
    BestEffort,
    /// Fail the table instead of dropping data
    Strict,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigratorConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Environment variable holding the password
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationSettings {
    pub source_schema: String,
    pub target_schema: String,
    pub commit_policy: CommitPolicy,
    pub column_policy: ColumnPolicy,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            source_schema: "public".to_string(),
            target_schema: "erp".to_string(),
            commit_policy: CommitPolicy::default(),
            column_policy: ColumnPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Explicit allow-list of columns to copy
    pub columns: Option<Vec<String>>,
    /// Columns for `ON CONFLICT (...)`; empty means any unique constraint
    #[serde(default)]
    pub conflict_target: Vec<String>,
}

/// Per-table copy rules taken from the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRule {
    pub columns: Option<Vec<String>>,
    pub conflict_target: Vec<String>,
}

impl DatabaseConfig {
    /// Build the driver config from either `url` or the discrete fields
    ///
    /// Discrete fields go through the `tokio_postgres::Config` builder, so IPv6
    /// hosts, Unix socket directories and arbitrary passwords need no escaping.
    /// Returns `Ok(None)` when the section is empty so the caller can fall back
    /// to the CLI or environment.
    pub fn pg_config(&self) -> Result<Option<Config>> {
        if let Some(url) = &self.url {
            if self.host.is_some() || self.name.is_some() || self.user.is_some() {
                bail!("[database] sets both 'url' and discrete connection fields; use one style");
            }
            return parse_connection_string(url)
                .context("Invalid [database] url")
                .map(Some);
        }

        let (host, name, user) = match (&self.host, &self.name, &self.user) {
            (None, None, None) => return Ok(None),
            (Some(host), Some(name), Some(user)) => (host, name, user),
            _ => {
                let missing: Vec<&str> = [
                    ("host", self.host.is_none()),
                    ("name", self.name.is_none()),
                    ("user", self.user.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(field, _)| *field)
                .collect();
                bail!(
                    "[database] is missing required field(s): {}",
                    missing.join(", ")
                );
            }
        };

        let mut config = Config::new();
        config
            .host(host)
            .port(self.port.unwrap_or(5432))
            .dbname(name)
            .user(user);
        if let Some(password) = self.resolve_password()? {
            config.password(password);
        }
        apply_keepalives(&mut config);

        Ok(Some(config))
    }

    fn resolve_password(&self) -> Result<Option<String>> {
        match (&self.password, &self.password_env) {
            (Some(_), Some(_)) => {
                bail!("[database] sets both 'password' and 'password_env'; use one")
            }
            (Some(password), None) => Ok(Some(password.clone())),
            (None, Some(var)) => std::env::var(var)
                .map(Some)
                .with_context(|| format!("Environment variable {} is not set", var)),
            (None, None) => Ok(None),
        }
    }
}

impl MigratorConfig {
    /// The plan declared under `[[tables]]`, or the built-in plan when none is
    pub fn plan(&self) -> Result<MigrationPlan> {
        if self.tables.is_empty() {
            return plan::default_plan().context("Built-in migration plan is invalid");
        }

        let entries = self
            .tables
            .iter()
            .map(|table| PlanEntry {
                name: table.name.clone(),
                depends_on: table.depends_on.clone(),
            })
            .collect();
        MigrationPlan::new(entries).context("Invalid migration plan in configuration")
    }

    pub fn table_rules(&self) -> HashMap<String, TableRule> {
        self.tables
            .iter()
            .map(|table| {
                (
                    table.name.clone(),
                    TableRule {
                        columns: table.columns.clone(),
                        conflict_target: table.conflict_target.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        validate_schemas(&self.migration)?;

        for table in &self.tables {
            if let Some(columns) = &table.columns {
                if columns.is_empty() {
                    bail!(
                        "Table '{}' declares an empty 'columns' list",
                        utils::sanitize_identifier(&table.name)
                    );
                }
                for column in columns {
                    utils::validate_postgres_identifier(column).with_context(|| {
                        format!("Invalid column in allow-list of '{}'", table.name)
                    })?;
                }
            }
            for column in &table.conflict_target {
                utils::validate_postgres_identifier(column).with_context(|| {
                    format!("Invalid conflict_target column for '{}'", table.name)
                })?;
            }
        }

        Ok(())
    }
}

/// Check that both schema names are safe identifiers and not the same schema
pub fn validate_schemas(settings: &MigrationSettings) -> Result<()> {
    utils::validate_postgres_identifier(&settings.source_schema)
        .context("Invalid source schema")?;
    utils::validate_postgres_identifier(&settings.target_schema)
        .context("Invalid target schema")?;
    if settings.source_schema == settings.target_schema {
        bail!(
            "Source and target schema are both '{}'; rows would be copied onto themselves",
            settings.source_schema
        );
    }
    Ok(())
}

/// Pick the connection: CLI flag, then `DATABASE_URL`, then the config file
///
/// A blank flag or variable counts as unset.
pub fn resolve_database(
    cli_url: Option<&str>,
    env_url: Option<&str>,
    config: &MigratorConfig,
) -> Result<Config> {
    let present = |url: &&str| !url.trim().is_empty();
    if let Some(url) = cli_url.filter(present).or(env_url.filter(present)) {
        return parse_connection_string(url);
    }
    match config.database.pg_config()? {
        Some(pg_config) => Ok(pg_config),
        None => bail!(
            "No database connection configured.\n\
             Pass --url, set DATABASE_URL, or add a [database] section to the config file"
        ),
    }
}

pub fn load_config_from_file(path: &str) -> Result<MigratorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path))?;
    let parsed: MigratorConfig =
        toml::from_str(&raw).with_context(|| format!("Failed to parse TOML config at {}", path))?;
    parsed
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_postgres::config::Host;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{}", contents).unwrap();
        tmp
    }

    #[test]
    fn parse_sample_config() {
        let tmp = write_config(
            r#"
            [database]
            host = "172.17.0.1"
            port = 5432
            name = "erp_db"
            user = "admin"
            password = "s3cret"

            [migration]
            source_schema = "public"
            target_schema = "erp"
            commit_policy = "strict"
            column_policy = "best-effort"

            [[tables]]
            name = "Organization"

            [[tables]]
            name = "Media"
            depends_on = ["Organization"]
            columns = ["id", "url"]
            conflict_target = ["id"]
        "#,
        );

        let config = load_config_from_file(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(config.migration.commit_policy, CommitPolicy::Strict);
        assert_eq!(config.migration.column_policy, ColumnPolicy::BestEffort);
        let pg_config = config.database.pg_config().unwrap().unwrap();
        assert_eq!(pg_config.get_hosts(), &[Host::Tcp("172.17.0.1".to_string())]);
        assert_eq!(pg_config.get_ports(), &[5432]);
        assert_eq!(pg_config.get_dbname(), Some("erp_db"));
        assert_eq!(pg_config.get_user(), Some("admin"));
        assert_eq!(pg_config.get_password(), Some(&b"s3cret"[..]));

        let plan = config.plan().unwrap();
        assert_eq!(plan.table_names(), vec!["Organization", "Media"]);

        let rules = config.table_rules();
        assert_eq!(
            rules["Media"],
            TableRule {
                columns: Some(vec!["id".to_string(), "url".to_string()]),
                conflict_target: vec!["id".to_string()],
            }
        );
        assert_eq!(rules["Organization"], TableRule::default());
    }

    #[test]
    fn empty_config_uses_defaults_and_builtin_plan() {
        let config: MigratorConfig = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.migration.source_schema, "public");
        assert_eq!(config.migration.target_schema, "erp");
        assert_eq!(config.migration.commit_policy, CommitPolicy::BestEffort);
        assert!(config.database.pg_config().unwrap().is_none());
        assert_eq!(config.plan().unwrap().len(), 60);
    }

    #[test]
    fn pg_config_keeps_credentials_verbatim() {
        let db = DatabaseConfig {
            host: Some("db.internal".to_string()),
            name: Some("erp".to_string()),
            user: Some("app user".to_string()),
            password: Some("p@ss:w/rd".to_string()),
            ..Default::default()
        };

        let pg_config = db.pg_config().unwrap().unwrap();
        assert_eq!(pg_config.get_user(), Some("app user"));
        assert_eq!(pg_config.get_password(), Some(&b"p@ss:w/rd"[..]));
        assert!(pg_config.get_keepalives());
    }

    #[test]
    fn pg_config_accepts_ipv6_host() {
        let db = DatabaseConfig {
            host: Some("::1".to_string()),
            name: Some("erp".to_string()),
            user: Some("admin".to_string()),
            ..Default::default()
        };

        let pg_config = db.pg_config().unwrap().unwrap();
        assert_eq!(pg_config.get_hosts(), &[Host::Tcp("::1".to_string())]);
        assert_eq!(pg_config.get_ports(), &[5432]);
        assert_eq!(pg_config.get_dbname(), Some("erp"));
    }

    #[cfg(unix)]
    #[test]
    fn pg_config_accepts_unix_socket_directory() {
        let db = DatabaseConfig {
            host: Some("/var/run/postgresql".to_string()),
            name: Some("erp".to_string()),
            user: Some("admin".to_string()),
            ..Default::default()
        };

        let pg_config = db.pg_config().unwrap().unwrap();
        assert_eq!(
            pg_config.get_hosts(),
            &[Host::Unix(std::path::PathBuf::from("/var/run/postgresql"))]
        );
    }

    #[test]
    fn pg_config_reads_password_from_environment() {
        std::env::set_var("SCHEMA_MIGRATOR_TEST_PASSWORD", "from-env");
        let db = DatabaseConfig {
            host: Some("localhost".to_string()),
            port: Some(6543),
            name: Some("erp".to_string()),
            user: Some("admin".to_string()),
            password_env: Some("SCHEMA_MIGRATOR_TEST_PASSWORD".to_string()),
            ..Default::default()
        };

        let pg_config = db.pg_config().unwrap().unwrap();
        assert_eq!(pg_config.get_ports(), &[6543]);
        assert_eq!(pg_config.get_password(), Some(&b"from-env"[..]));
    }

    #[test]
    fn pg_config_rejects_incomplete_or_mixed_settings() {
        let partial = DatabaseConfig {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        let err = partial.pg_config().unwrap_err().to_string();
        assert!(err.contains("name, user"), "{}", err);

        let mixed = DatabaseConfig {
            url: Some("postgresql://a@b/c".to_string()),
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(mixed.pg_config().is_err());

        let missing_env = DatabaseConfig {
            host: Some("localhost".to_string()),
            name: Some("erp".to_string()),
            user: Some("admin".to_string()),
            password_env: Some("SCHEMA_MIGRATOR_TEST_UNSET_VARIABLE".to_string()),
            ..Default::default()
        };
        assert!(missing_env.pg_config().is_err());
    }

    #[test]
    fn rejects_same_source_and_target_schema() {
        let config: MigratorConfig = toml::from_str(
            r#"
            [migration]
            source_schema = "erp"
            target_schema = "erp"
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_fields_and_policies() {
        assert!(toml::from_str::<MigratorConfig>("[migration]\nsource = \"public\"").is_err());
        assert!(
            toml::from_str::<MigratorConfig>("[migration]\ncommit_policy = \"sometimes\"").is_err()
        );
    }

    #[test]
    fn rejects_cyclic_table_plan() {
        let config: MigratorConfig = toml::from_str(
            r#"
            [[tables]]
            name = "Sale"
            depends_on = ["SaleItem"]

            [[tables]]
            name = "SaleItem"
            depends_on = ["Sale"]
        "#,
        )
        .unwrap();
        assert!(config.plan().is_err());
    }

    #[test]
    fn rejects_unsafe_allow_list_columns() {
        let config: MigratorConfig = toml::from_str(
            r#"
            [[tables]]
            name = "Media"
            columns = ["id", "url; DROP TABLE x"]
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn database_prefers_cli_then_environment_then_file() {
        let config: MigratorConfig =
            toml::from_str("[database]\nurl = \"postgresql://file@localhost/erp\"").unwrap();
        let user = |cli: Option<&str>, env: Option<&str>| {
            resolve_database(cli, env, &config)
                .unwrap()
                .get_user()
                .map(str::to_string)
        };

        assert_eq!(
            user(
                Some("postgresql://cli@localhost/erp"),
                Some("postgresql://env@localhost/erp")
            )
            .as_deref(),
            Some("cli")
        );
        assert_eq!(
            user(None, Some("postgresql://env@localhost/erp")).as_deref(),
            Some("env")
        );
        assert_eq!(user(None, Some("  ")).as_deref(), Some("file"));

        assert!(resolve_database(None, None, &MigratorConfig::default()).is_err());
    }

    #[test]
    fn blank_cli_url_does_not_hide_environment() {
        let config: MigratorConfig =
            toml::from_str("[database]\nurl = \"postgresql://file@localhost/erp\"").unwrap();

        let pg_config =
            resolve_database(Some(""), Some("postgresql://env@localhost/erp"), &config).unwrap();
        assert_eq!(pg_config.get_user(), Some("env"));
    }
}
