// ABOUTME: Command implementations for each CLI subcommand
// ABOUTME: Exports migrate, table, verify, and plan commands

pub mod migrate;
pub mod plan;
pub mod table;
pub mod verify;

pub use migrate::{migrate, RunOptions};
pub use plan::{render_plan, show_plan};
pub use table::migrate_single_table;
pub use verify::verify;
