// ABOUTME: Column selection and insert-from-select copy for one table
// ABOUTME: Matches columns by name and skips rows that collide with existing ones

use crate::config::{ColumnPolicy, TableRule};
use crate::migration::report::{TableFailure, TableOutcome};
use crate::migration::schema::TableLayout;
use crate::utils::{preview_names, quote_ident, quote_qualified};
use std::collections::HashSet;

/// What to do with one table, decided from its catalog entries alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPlan {
    Skip(TableOutcome),
    Fail(TableFailure),
    Copy {
        columns: Vec<String>,
        dropped: Vec<String>,
    },
}

/// Decide which columns to copy for a table
///
/// Order of checks: destination absent, source absent, empty column list on
/// either side, then column matching. With an allow-list every listed column
/// must exist on both sides. Without one the common columns are used in
/// destination order, and `ColumnPolicy::Strict` refuses to drop source columns.
pub fn plan_copy(layout: &TableLayout, rule: &TableRule, policy: ColumnPolicy) -> CopyPlan {
    let target = match &layout.target_columns {
        Some(columns) => columns,
        None => return CopyPlan::Skip(TableOutcome::SkippedMissingTarget),
    };
    let source = match &layout.source_columns {
        Some(columns) => columns,
        None => return CopyPlan::Skip(TableOutcome::SkippedMissingSource),
    };
    if target.is_empty() || source.is_empty() {
        return CopyPlan::Skip(TableOutcome::SkippedEmptySchema);
    }

    let source_set: HashSet<&str> = source.iter().map(String::as_str).collect();
    let target_set: HashSet<&str> = target.iter().map(String::as_str).collect();

    if let Some(allowed) = &rule.columns {
        let mut seen = HashSet::new();
        let columns: Vec<String> = allowed
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !source_set.contains(c.as_str()) || !target_set.contains(c.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return CopyPlan::Fail(TableFailure::MissingAllowedColumns { missing });
        }

        let dropped = source
            .iter()
            .filter(|c| !seen.contains(c.as_str()))
            .cloned()
            .collect();
        return CopyPlan::Copy { columns, dropped };
    }

    let columns: Vec<String> = target
        .iter()
        .filter(|c| source_set.contains(c.as_str()))
        .cloned()
        .collect();
    if columns.is_empty() {
        return CopyPlan::Fail(TableFailure::NoCommonColumns {
            target_preview: preview_names(target, 5),
            source_preview: preview_names(source, 5),
        });
    }

    let dropped: Vec<String> = source
        .iter()
        .filter(|c| !target_set.contains(c.as_str()))
        .cloned()
        .collect();
    if policy == ColumnPolicy::Strict && !dropped.is_empty() {
        return CopyPlan::Fail(TableFailure::DroppedColumns { columns: dropped });
    }

    CopyPlan::Copy { columns, dropped }
}

/// Build the `INSERT ... SELECT ... ON CONFLICT DO NOTHING` statement
///
/// Every identifier is quoted. An empty `conflict_target` lets any unique
/// constraint on the destination discard the row.
pub fn build_insert_sql(
    source_schema: &str,
    target_schema: &str,
    table: &str,
    columns: &[String],
    conflict_target: &[String],
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let conflict = if conflict_target.is_empty() {
        String::new()
    } else {
        format!(
            " ({})",
            conflict_target
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT{} DO NOTHING",
        quote_qualified(target_schema, table),
        column_list,
        column_list,
        quote_qualified(source_schema, table),
        conflict
    )
}
