// 📐 Shape Layer - Star Schema Definitions
// The five tables as data, rendered to SQLite DDL

use crate::attributes::{AttributeDefinition, AttributeRegistry, AttributeType};
use serde::Serialize;

// ============================================================================
// TABLE NAMES
// ============================================================================

pub const BANK_BASE: &str = "bank_base";
pub const CLIENT: &str = "client";
pub const CONTACT: &str = "contact";
pub const CAMPAIGN: &str = "campaign";
pub const MARKETING: &str = "marketing";

/// Tables in dependency order (referenced tables first)
pub const STAR_TABLES: [&str; 5] = [BANK_BASE, CLIENT, CONTACT, CAMPAIGN, MARKETING];

/// Dimension tables, each carrying exactly one row per fact_id
pub const DIMENSION_TABLES: [(&str, &str); 3] = [
    (CLIENT, "client_id"),
    (CONTACT, "contact_id"),
    (CAMPAIGN, "campaign_id"),
];

// ============================================================================
// DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: &'static str,
    pub not_null: bool,
    pub check: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, sql_type: &'static str, not_null: bool) -> Self {
        ColumnDefinition {
            name: name.to_string(),
            sql_type,
            not_null,
            check: None,
        }
    }

    pub fn from_attribute(attr: &AttributeDefinition) -> Self {
        let check = match attr.type_ {
            AttributeType::Flag => Some(format!("{} IN (0, 1)", attr.name)),
            _ => None,
        };

        ColumnDefinition {
            name: attr.name.clone(),
            sql_type: attr.type_.sql_type(),
            not_null: attr.is_required(),
            check,
        }
    }

    fn render(&self, primary_key: bool) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({})", check));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: String,
    pub columns: Vec<ColumnDefinition>,
    pub foreign_keys: Vec<ForeignKey>,
    pub uniques: Vec<String>,
}

impl TableDefinition {
    fn new(name: &str, primary_key: &str) -> Self {
        TableDefinition {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            columns: vec![ColumnDefinition::new(primary_key, "INTEGER", true)],
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
        }
    }

    fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    fn attributes(mut self, registry: &AttributeRegistry, names: &[&str]) -> Self {
        self.columns.extend(
            names
                .iter()
                .filter_map(|name| registry.get_by_name(name))
                .map(ColumnDefinition::from_attribute),
        );
        self
    }

    /// Adds a NOT NULL UNIQUE column referencing another table
    fn references(mut self, column: &str, table: &str, table_column: &str) -> Self {
        if !self.columns.iter().any(|c| c.name == column) {
            self.columns.push(ColumnDefinition::new(column, "INTEGER", true));
        }
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references_table: table.to_string(),
            references_column: table_column.to_string(),
        });
        if column != self.primary_key {
            self.uniques.push(column.to_string());
        }
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// CREATE TABLE IF NOT EXISTS statement
    pub fn create_statement(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.render(c.name == self.primary_key))
            .collect();

        for unique in &self.uniques {
            lines.push(format!("UNIQUE ({})", unique));
        }

        for fk in &self.foreign_keys {
            lines.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                fk.column, fk.references_table, fk.references_column
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.name,
            lines.join(",\n    ")
        )
    }
}

// ============================================================================
// STAR SCHEMA
// ============================================================================

const CLIENT_COLUMNS: &[&str] = &[
    "age",
    "age_group",
    "job",
    "marital",
    "education",
    "credit_default",
    "housing",
    "loan",
];
const CONTACT_COLUMNS: &[&str] = &["contact", "month", "day", "duration", "duration_length"];
const CAMPAIGN_COLUMNS: &[&str] = &["campaign", "pdays", "previous", "poutcome"];
const BASE_COLUMNS: &[&str] = &[
    "age",
    "job",
    "marital",
    "education",
    "credit_default",
    "balance",
    "housing",
    "loan",
    "contact",
    "day",
    "month",
    "duration",
    "campaign",
    "pdays",
    "previous",
    "poutcome",
    "subscribed",
];

/// The five star-schema tables, in dependency order
pub fn star_tables() -> Vec<TableDefinition> {
    let registry = AttributeRegistry::new();

    let bank_base = TableDefinition::new(BANK_BASE, "fact_id")
        .attributes(&registry, BASE_COLUMNS)
        .column(ColumnDefinition::new("source_file", "TEXT", true))
        .column(ColumnDefinition::new("line_number", "INTEGER", true))
        .column(ColumnDefinition::new("idempotency_hash", "TEXT", true))
        .column(ColumnDefinition::new("imported_at", "TEXT", true));
    let bank_base = TableDefinition {
        uniques: vec!["idempotency_hash".to_string()],
        ..bank_base
    };

    let client = TableDefinition::new(CLIENT, "client_id")
        .references("fact_id", BANK_BASE, "fact_id")
        .attributes(&registry, CLIENT_COLUMNS);

    let contact = TableDefinition::new(CONTACT, "contact_id")
        .references("fact_id", BANK_BASE, "fact_id")
        .attributes(&registry, CONTACT_COLUMNS);

    let campaign = TableDefinition::new(CAMPAIGN, "campaign_id")
        .references("fact_id", BANK_BASE, "fact_id")
        .attributes(&registry, CAMPAIGN_COLUMNS);

    let marketing = TableDefinition::new(MARKETING, "fact_id")
        .references("fact_id", BANK_BASE, "fact_id")
        .references("client_id", CLIENT, "client_id")
        .references("contact_id", CONTACT, "contact_id")
        .references("campaign_id", CAMPAIGN, "campaign_id")
        .attributes(&registry, &["subscribed"]);

    vec![bank_base, client, contact, campaign, marketing]
}

/// Look up a star table by name
pub fn table(name: &str) -> Option<TableDefinition> {
    star_tables().into_iter().find(|t| t.name == name)
}

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_client_age_group ON client(age_group)",
    "CREATE INDEX IF NOT EXISTS idx_client_job ON client(job)",
    "CREATE INDEX IF NOT EXISTS idx_contact_duration_length ON contact(duration_length)",
];

/// Joined fact view, one row per marketing fact
pub const MARKETING_VIEW: &str = "CREATE VIEW IF NOT EXISTS marketing_view AS
SELECT
    m.fact_id, m.client_id, m.contact_id, m.campaign_id,
    cl.age, cl.age_group, cl.job, cl.marital, cl.education,
    cl.credit_default, b.balance, cl.housing, cl.loan,
    co.contact, co.month, co.day, co.duration, co.duration_length,
    ca.campaign, ca.pdays, ca.previous, ca.poutcome,
    m.subscribed,
    CASE WHEN m.subscribed = 1 THEN 'Subscribed' ELSE 'Not Subscribed' END AS subscribed_label
FROM marketing m
LEFT JOIN client cl ON cl.fact_id = m.fact_id
LEFT JOIN contact co ON co.fact_id = m.fact_id
LEFT JOIN campaign ca ON ca.fact_id = m.fact_id
LEFT JOIN bank_base b ON b.fact_id = m.fact_id;";

/// Name used by ad-hoc queries
pub const DATA_VIEW: &str = "CREATE VIEW IF NOT EXISTS data AS SELECT * FROM marketing_view;";

/// Full DDL script: tables, indexes, views
pub fn render_ddl() -> String {
    let mut statements: Vec<String> = star_tables()
        .iter()
        .map(|t| t.create_statement())
        .collect();

    statements.extend(INDEXES.iter().map(|i| format!("{};", i)));
    statements.push(MARKETING_VIEW.to_string());
    statements.push(DATA_VIEW.to_string());

    statements.join("\n\n") + "\n"
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_five_tables_in_dependency_order() {
        let tables = star_tables();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();

        assert_eq!(names, STAR_TABLES.to_vec());
    }

    #[test]
    fn test_client_projects_demographics() {
        let client = table(CLIENT).unwrap();

        assert_eq!(client.primary_key, "client_id");
        for column in ["fact_id", "age", "job", "marital", "education", "credit_default", "housing", "loan"] {
            assert!(client.has_column(column), "client should have {}", column);
        }
        assert!(!client.has_column("duration"));
    }

    #[test]
    fn test_marketing_references_every_dimension() {
        let marketing = table(MARKETING).unwrap();
        let targets: Vec<_> = marketing
            .foreign_keys
            .iter()
            .map(|fk| fk.references_table.as_str())
            .collect();

        assert_eq!(targets, vec![BANK_BASE, CLIENT, CONTACT, CAMPAIGN]);
        assert!(marketing.has_column("subscribed"));
    }

    #[test]
    fn test_create_statement_shape() {
        let contact = table(CONTACT).unwrap();
        let sql = contact.create_statement();

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS contact ("));
        assert!(sql.contains("contact_id INTEGER PRIMARY KEY"));
        assert!(sql.contains("UNIQUE (fact_id)"));
        assert!(sql.contains("FOREIGN KEY (fact_id) REFERENCES bank_base(fact_id)"));
    }

    #[test]
    fn test_balance_nullable_subscribed_checked() {
        let base = table(BANK_BASE).unwrap().create_statement();

        assert!(base.contains("balance INTEGER,"));
        assert!(base.contains("subscribed INTEGER NOT NULL CHECK (subscribed IN (0, 1))"));
    }

    #[test]
    fn test_unknown_table() {
        assert!(table("transactions").is_none());
    }

    #[test]
    fn test_ddl_executes_in_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&render_ddl()).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);

        // Views resolve against the tables
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM data", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
