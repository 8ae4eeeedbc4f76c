// ABOUTME: Migration module
// ABOUTME: Handles catalog introspection, table copies, verification, and reporting

pub mod copy;
pub mod migrator;
pub mod report;
pub mod schema;
pub mod verify;

pub use copy::{build_insert_sql, plan_copy, CopyPlan};
pub use migrator::Migrator;
pub use report::{
    decide, CommitDecision, MigrationReport, RollbackReason, TableFailure, TableOutcome,
};
pub use schema::{column_names, table_exists, SchemaCatalog, TableLayout};
pub use verify::{count_rows, verify_counts, TableCount, Verification};
