// ABOUTME: Migration plan as a dependency graph of tables
// ABOUTME: Validates dependencies at startup and yields a foreign-key safe copy order

use crate::utils;
use std::collections::{BTreeSet, HashMap, HashSet};

/// One table in the plan and the tables it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub name: String,
    pub depends_on: Vec<String>,
}

impl PlanEntry {
    pub fn new(name: impl Into<String>, depends_on: &[&str]) -> Self {
        Self {
            name: name.into(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Migration plan is empty")]
    Empty,

    #[error("Table '{0}' appears more than once in the migration plan")]
    DuplicateTable(String),

    #[error("Table '{table}' depends on '{dependency}' which is not in the migration plan")]
    MissingDependency { table: String, dependency: String },

    #[error("Table '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Circular dependency between tables: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("Invalid table name '{table}': {reason}")]
    InvalidName { table: String, reason: String },
}

/// Ordered set of tables to copy
///
/// Construction validates the graph, so a `MigrationPlan` value is always
/// acyclic with every dependency present. [`MigrationPlan::ordered`] keeps the
/// declaration order wherever the dependencies allow it.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    entries: Vec<PlanEntry>,
    order: Vec<usize>,
}

impl MigrationPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Result<Self, PlanError> {
        if entries.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            utils::validate_postgres_identifier(&entry.name).map_err(|e| {
                PlanError::InvalidName {
                    table: utils::sanitize_identifier(&entry.name),
                    reason: e.to_string(),
                }
            })?;
            if index.insert(entry.name.as_str(), i).is_some() {
                return Err(PlanError::DuplicateTable(entry.name.clone()));
            }
        }

        for entry in &entries {
            for dep in &entry.depends_on {
                if dep == &entry.name {
                    return Err(PlanError::SelfDependency(entry.name.clone()));
                }
                if !index.contains_key(dep.as_str()) {
                    return Err(PlanError::MissingDependency {
                        table: entry.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&entries, &index)?;
        Ok(Self { entries, order })
    }

    /// Plan built from a plain list, each table depending on nothing
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, PlanError> {
        Self::new(
            names
                .iter()
                .map(|name| PlanEntry::new(name.as_ref(), &[]))
                .collect(),
        )
    }

    /// Entries in copy order
    pub fn ordered(&self) -> impl Iterator<Item = &PlanEntry> {
        self.order.iter().map(move |&i| &self.entries[i])
    }

    /// Table names in copy order
    pub fn table_names(&self) -> Vec<String> {
        self.ordered().map(|entry| entry.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tables that the declaration lists before one of their dependencies
    ///
    /// These are reordered by [`MigrationPlan::ordered`]; callers log them so a
    /// hand-maintained list can be fixed at the source.
    pub fn out_of_order(&self) -> Vec<(String, String)> {
        let position: HashMap<&str, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.name.as_str(), i))
            .collect();

        let mut violations = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            for dep in &entry.depends_on {
                if position[dep.as_str()] > i {
                    violations.push((entry.name.clone(), dep.clone()));
                }
            }
        }
        violations
    }
}

// Kahn's algorithm, always releasing the lowest declaration index first
fn topological_order(
    entries: &[PlanEntry],
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, PlanError> {
    let mut in_degree = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];

    for (i, entry) in entries.iter().enumerate() {
        let unique: HashSet<&str> = entry.depends_on.iter().map(String::as_str).collect();
        for dep in unique {
            let d = index[dep];
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(entries.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != entries.len() {
        let placed: HashSet<usize> = order.into_iter().collect();
        let stuck = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed.contains(i))
            .map(|(_, entry)| entry.name.clone())
            .collect();
        return Err(PlanError::CircularDependency(stuck));
    }

    Ok(order)
}

/// Built-in plan for the ERP data set, grouped by phase
pub fn default_plan() -> Result<MigrationPlan, PlanError> {
    const TABLES: &[(&str, &[&str])] = &[
        // Independent
        ("Organization", &[]),
        // People and users
        ("Pessoa", &["Organization"]),
        ("User", &["Organization"]),
        ("UserSettings", &["User"]),
        ("Client", &["Pessoa", "Organization"]),
        ("Fornecedor", &["Pessoa", "Organization"]),
        ("Funcionario", &["Pessoa", "Organization"]),
        // Media and landing page
        ("Media", &["Organization"]),
        ("LandingPage", &["Organization", "Media"]),
        ("Section", &["LandingPage", "Media"]),
        // Products
        ("ProductGroup", &["Organization"]),
        ("Product", &["ProductGroup", "Organization"]),
        ("RawMaterial", &["Organization"]),
        ("InventoryLot", &["Product"]),
        ("StockMovement", &["Product", "InventoryLot"]),
        // Finance
        ("ContaContabil", &["Organization"]),
        ("ContaCorrente", &["ContaContabil"]),
        ("PaymentTerm", &["Organization"]),
        // Sales
        ("Sale", &["Client", "PaymentTerm"]),
        ("SaleItem", &["Sale", "Product"]),
        ("SaleItemLot", &["SaleItem", "InventoryLot"]),
        ("SaleInstallment", &["Sale"]),
        ("SaleAdjustment", &["Sale"]),
        // Payables and receivables
        ("AccountPay", &["Fornecedor", "ContaContabil"]),
        ("AccountRec", &["Sale", "ContaContabil"]),
        (
            "Transacao",
            &["ContaCorrente", "ContaContabil", "AccountPay", "AccountRec"],
        ),
        // Cards
        ("CreditCard", &["ContaContabil"]),
        ("CreditCardBill", &["CreditCard"]),
        (
            "CreditCardTransaction",
            &["CreditCard", "CreditCardBill", "ContaContabil"],
        ),
        ("CreditCardFee", &["CreditCard"]),
        // Metal and production
        ("MetalAccount", &["Pessoa"]),
        ("MetalAccountEntry", &["MetalAccount"]),
        ("MetalCredit", &["Client"]),
        ("MetalReceivable", &["Sale"]),
        ("MetalReceivablePayment", &["MetalReceivable"]),
        ("RecoveryOrder", &["Organization"]),
        ("Recuperacao", &["Organization"]),
        ("AnaliseQuimica", &["Client", "RecoveryOrder"]),
        ("chemical_reactions", &["Organization"]),
        ("ChemicalReactionLot", &["chemical_reactions"]),
        ("pure_metal_lots", &["RecoveryOrder", "chemical_reactions"]),
        ("PureMetalLotMovement", &["pure_metal_lots"]),
        (
            "RawMaterialUsed",
            &["RawMaterial", "RecoveryOrder", "chemical_reactions"],
        ),
        // Purchasing and quotations
        ("PurchaseOrder", &["Fornecedor"]),
        ("PurchaseOrderItem", &["PurchaseOrder", "Product"]),
        ("Quotation", &["Organization"]),
        ("LaborCostTableEntry", &["Organization"]),
        ("OperationalCost", &["Organization"]),
        ("MarketData", &["Organization"]),
        // System
        ("MenuItem", &["Organization"]),
        ("AppearanceSettings", &["Organization"]),
        ("Task", &["Organization"]),
        ("Tutorial", &[]),
        ("ThemePreset", &["Organization"]),
        ("WhatsAppRoutine", &["Organization"]),
        ("XmlImportLog", &["Organization"]),
        // Counters
        ("ProductionBatchCounter", &["Organization"]),
        ("CrrCounter", &["Organization"]),
        ("EntityCounter", &["Organization"]),
        // ORM bookkeeping
        ("_prisma_migrations", &[]),
    ];

    let entries = TABLES
        .iter()
        .map(|(name, deps)| PlanEntry::new(*name, deps))
        .collect();

    MigrationPlan::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &MigrationPlan) -> Vec<String> {
        plan.table_names()
    }

    #[test]
    fn default_plan_is_valid_and_keeps_declared_order() {
        let plan = default_plan().unwrap();
        assert_eq!(plan.len(), 60);
        assert!(plan.out_of_order().is_empty());

        let ordered = names(&plan);
        assert_eq!(ordered.first().map(String::as_str), Some("Organization"));
        assert_eq!(ordered.last().map(String::as_str), Some("_prisma_migrations"));
    }

    #[test]
    fn every_table_follows_its_dependencies() {
        let plan = default_plan().unwrap();
        let ordered = names(&plan);
        let position = |name: &str| ordered.iter().position(|n| n == name).unwrap();

        for entry in plan.ordered() {
            for dep in &entry.depends_on {
                assert!(
                    position(dep) < position(&entry.name),
                    "{} must come after {}",
                    entry.name,
                    dep
                );
            }
        }
    }

    #[test]
    fn reorders_tables_declared_before_their_dependencies() {
        let plan = MigrationPlan::new(vec![
            PlanEntry::new("SaleItem", &["Sale", "Product"]),
            PlanEntry::new("Product", &[]),
            PlanEntry::new("Sale", &["Client"]),
            PlanEntry::new("Client", &[]),
        ])
        .unwrap();

        assert_eq!(names(&plan), vec!["Product", "Client", "Sale", "SaleItem"]);
        assert_eq!(
            plan.out_of_order(),
            vec![
                ("SaleItem".to_string(), "Sale".to_string()),
                ("SaleItem".to_string(), "Product".to_string()),
                ("Sale".to_string(), "Client".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_cycles() {
        let err = MigrationPlan::new(vec![
            PlanEntry::new("Organization", &[]),
            PlanEntry::new("A", &["B"]),
            PlanEntry::new("B", &["A"]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            PlanError::CircularDependency(vec!["A".to_string(), "B".to_string()])
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = MigrationPlan::new(vec![PlanEntry::new("Sale", &["Client"])]).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingDependency {
                table: "Sale".to_string(),
                dependency: "Client".to_string(),
            }
        );
    }

    #[test]
    fn rejects_duplicates_self_references_and_empty_plans() {
        assert_eq!(
            MigrationPlan::from_names(&["Media", "Media"]).unwrap_err(),
            PlanError::DuplicateTable("Media".to_string())
        );
        assert_eq!(
            MigrationPlan::new(vec![PlanEntry::new("Task", &["Task"])]).unwrap_err(),
            PlanError::SelfDependency("Task".to_string())
        );
        assert_eq!(
            MigrationPlan::from_names::<&str>(&[]).unwrap_err(),
            PlanError::Empty
        );
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let err = MigrationPlan::from_names(&["Media\"; DROP TABLE x; --"]).unwrap_err();
        assert!(matches!(err, PlanError::InvalidName { .. }));
    }

    #[test]
    fn repeated_dependency_counts_once() {
        let plan = MigrationPlan::new(vec![
            PlanEntry::new("Client", &[]),
            PlanEntry::new("Sale", &["Client", "Client"]),
        ])
        .unwrap();
        assert_eq!(names(&plan), vec!["Client", "Sale"]);
    }
}
