//! Table catalog: which relational tables a snapshot covers and in what
//! order they are restored.
//!
//! [`CATALOG`] is listed parent-before-child. Inserts follow catalog order;
//! destructive deletes walk it in reverse so foreign keys are never
//! violated mid-restore.

use serde::Serialize;

use super::BackupConfig;

/// Which configuration switch selects a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCategory {
    /// Backup settings record; travels with the database tables.
    Settings,
    /// Business data (users, reservations, campaigns, email queue...).
    Database,
    /// Audit trail rows.
    Logs,
}

/// A single table known to the backup pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Key used inside snapshot documents (e.g. `"users"`).
    pub key: &'static str,
    /// SQL table name as created by the main application (e.g. `"User"`).
    pub table: &'static str,
    /// Primary key column used for upserts.
    pub primary_key: &'static str,
    /// Selection category.
    pub category: TableCategory,
    /// Keys of the tables this one holds foreign keys into.
    pub parents: &'static [&'static str],
}

impl TableSpec {
    const fn new(key: &'static str, table: &'static str, category: TableCategory) -> Self {
        Self {
            key,
            table,
            primary_key: "id",
            category,
            parents: &[],
        }
    }

    const fn child_of(self, parents: &'static [&'static str]) -> Self {
        Self { parents, ..self }
    }

    /// Returns the double-quoted SQL identifier for this table.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_ident(self.table)
    }
}

/// All tables, parent-before-child.
pub static CATALOG: [TableSpec; 16] = [
    TableSpec::new("systemSettings", "SystemSettings", TableCategory::Settings),
    TableSpec::new("users", "User", TableCategory::Database),
    TableSpec::new("accounts", "Account", TableCategory::Database).child_of(&["users"]),
    TableSpec::new("sessions", "Session", TableCategory::Database).child_of(&["users"]),
    TableSpec::new("reservations", "Reservation", TableCategory::Database).child_of(&["users"]),
    TableSpec::new("passengers", "Passenger", TableCategory::Database).child_of(&["reservations"]),
    TableSpec::new("payments", "Payment", TableCategory::Database).child_of(&["reservations"]),
    TableSpec::new("searchFavorites", "SearchFavorite", TableCategory::Database).child_of(&["users"]),
    TableSpec::new("priceAlerts", "PriceAlert", TableCategory::Database).child_of(&["users"]),
    TableSpec::new("emailSettings", "EmailSettings", TableCategory::Database),
    TableSpec::new("emailTemplates", "EmailTemplate", TableCategory::Database),
    TableSpec::new("emailQueue", "EmailQueue", TableCategory::Database).child_of(&["emailTemplates"]),
    TableSpec::new("emailLogs", "EmailLog", TableCategory::Database).child_of(&["emailQueue"]),
    TableSpec::new("systemLogs", "SystemLog", TableCategory::Logs),
    TableSpec::new("campaigns", "Campaign", TableCategory::Database).child_of(&["users"]),
    TableSpec::new("surveyResponses", "SurveyResponse", TableCategory::Database)
        .child_of(&["users", "campaigns"]),
];

/// Looks up a catalog entry by its snapshot key.
#[must_use]
pub fn find(key: &str) -> Option<&'static TableSpec> {
    CATALOG.iter().find(|spec| spec.key == key)
}

/// Returns the tables selected by the `include*` switches of `config`,
/// in catalog order.
#[must_use]
pub fn select(config: &BackupConfig) -> Vec<&'static TableSpec> {
    CATALOG
        .iter()
        .filter(|spec| match spec.category {
            TableCategory::Settings | TableCategory::Database => config.include_database,
            TableCategory::Logs => config.include_logs,
        })
        .collect()
}

/// Every table that references `key`, directly or through another child,
/// in catalog order.
#[must_use]
pub fn dependents(key: &str) -> Vec<&'static TableSpec> {
    let mut reached = vec![key];
    let mut found = Vec::new();
    // Children follow their parents in the catalog, so one pass suffices.
    for spec in CATALOG.iter() {
        if spec.parents.iter().any(|parent| reached.contains(parent)) {
            reached.push(spec.key);
            found.push(spec);
        }
    }
    found
}

/// Position of a table in catalog (insert) order.
#[must_use]
pub fn rank(key: &str) -> Option<usize> {
    CATALOG.iter().position(|spec| spec.key == key)
}

/// Quotes a SQL identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_keys_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in CATALOG.iter().skip(i + 1) {
                assert_ne!(a.key, b.key);
                assert_ne!(a.table, b.table);
            }
        }
    }

    #[test]
    fn parents_precede_children() {
        let order = |k: &str| rank(k).unwrap_or(usize::MAX);
        assert!(order("users") < order("accounts"));
        assert!(order("users") < order("sessions"));
        assert!(order("reservations") < order("passengers"));
        assert!(order("reservations") < order("payments"));
        assert!(order("emailTemplates") < order("emailQueue"));
        assert!(order("users") < order("surveyResponses"));
    }

    #[test]
    fn parents_are_catalog_keys_listed_earlier() {
        for (i, spec) in CATALOG.iter().enumerate() {
            for parent in spec.parents {
                assert!(rank(parent).is_some_and(|p| p < i), "{} -> {parent}", spec.key);
            }
        }
    }

    #[test]
    fn dependents_are_transitive() {
        let keys = |key: &str| dependents(key).iter().map(|s| s.key).collect::<Vec<_>>();
        assert_eq!(keys("reservations"), vec!["passengers", "payments"]);
        assert_eq!(keys("emailTemplates"), vec!["emailQueue", "emailLogs"]);
        assert!(keys("users").contains(&"payments"));
        assert!(keys("users").contains(&"surveyResponses"));
        assert!(keys("systemLogs").is_empty());
    }

    #[test]
    fn select_honors_switches() {
        let mut config = BackupConfig::default();
        assert_eq!(select(&config).len(), CATALOG.len());

        config.include_logs = false;
        let keys: Vec<_> = select(&config).iter().map(|s| s.key).collect();
        assert!(!keys.contains(&"systemLogs"));
        assert!(keys.contains(&"users"));

        config.include_database = false;
        assert!(select(&config).is_empty());

        config.include_logs = true;
        let keys: Vec<_> = select(&config).iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["systemLogs"]);
    }

    #[test]
    fn quote_ident_escapes() {
        assert_eq!(quote_ident("User"), "\"User\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
