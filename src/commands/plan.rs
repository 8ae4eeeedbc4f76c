// ABOUTME: Plan command implementation - print the resolved copy order
// ABOUTME: Needs no database connection

use crate::plan::MigrationPlan;

/// Render the plan in copy order, one table per line with its dependencies
pub fn render_plan(plan: &MigrationPlan) -> String {
    let width = plan.len().to_string().len();
    plan.ordered()
        .enumerate()
        .map(|(i, entry)| {
            if entry.depends_on.is_empty() {
                format!("{:>width$}. {}", i + 1, entry.name, width = width)
            } else {
                format!(
                    "{:>width$}. {} (after {})",
                    i + 1,
                    entry.name,
                    entry.depends_on.join(", "),
                    width = width
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn show_plan(plan: &MigrationPlan) {
    for (table, dependency) in plan.out_of_order() {
        tracing::warn!("⚠ {} is declared before its dependency {}", table, dependency);
    }

    println!("{}", render_plan(plan));
    println!();
    println!("{} table(s)", plan.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanEntry;

    #[test]
    fn renders_order_and_dependencies() {
        let plan = MigrationPlan::new(vec![
            PlanEntry::new("Sale", &["Client"]),
            PlanEntry::new("Client", &[]),
        ])
        .unwrap();

        assert_eq!(render_plan(&plan), "1. Client\n2. Sale (after Client)");
    }

    #[test]
    fn pads_indices_for_long_plans() {
        let names: Vec<String> = (0..12).map(|i| format!("T{}", i)).collect();
        let plan = MigrationPlan::from_names(&names).unwrap();
        let rendered = render_plan(&plan);

        assert!(rendered.starts_with(" 1. T0\n"));
        assert!(rendered.ends_with("12. T11"));
    }
}
