// ABOUTME: Library module for schema-migrator
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod commands;
pub mod config;
pub mod migration;
pub mod plan;
pub mod postgres;
pub mod utils;
