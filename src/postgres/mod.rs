// ABOUTME: PostgreSQL utilities module
// ABOUTME: Exports connection management for the migration run

pub mod connection;

pub use connection::{connect, connect_with_config, parse_connection_string};
