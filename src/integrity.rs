// 🔗 Referential Integrity - star schema invariants
// Every fact_id in bank_base has exactly one row in each dimension and in marketing,
// and every key the fact table holds resolves in the referenced table.

use crate::schema::{BANK_BASE, DIMENSION_TABLES, MARKETING};
use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

/// Offending ids listed per check
pub const SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckKind {
    /// Row references a fact_id missing from bank_base
    Orphan,
    /// bank_base row without its dimension/fact row
    Missing,
    /// fact_id present more than once
    Duplicate,
    /// marketing key not found in the dimension
    DanglingKey,
    /// marketing key resolves to a dimension row of another fact
    CrossFact,
    /// marketing.subscribed differs from bank_base.subscribed
    OutcomeMismatch,
    /// SQLite PRAGMA foreign_key_check
    ForeignKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityCheck {
    pub kind: CheckKind,
    pub table: String,
    pub description: String,
    pub violations: i64,
    pub sample_ids: Vec<i64>,
}

impl IntegrityCheck {
    pub fn passed(&self) -> bool {
        self.violations == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub checks: Vec<IntegrityCheck>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed())
    }

    pub fn total_violations(&self) -> i64 {
        self.checks.iter().map(|c| c.violations).sum()
    }

    pub fn failures(&self) -> Vec<&IntegrityCheck> {
        self.checks.iter().filter(|c| !c.passed()).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Integrity: {}/{} checks passed, {} violations",
            self.checks.len() - self.failures().len(),
            self.checks.len(),
            self.total_violations()
        )
    }
}

/// Count and sample the ids returned by `sql`
fn run_check(
    conn: &Connection,
    kind: CheckKind,
    table: &str,
    description: String,
    sql: &str,
) -> Result<IntegrityCheck> {
    let violations: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM ({})", sql), [], |row| row.get(0))?;

    let sample_ids = if violations > 0 {
        let mut stmt = conn.prepare(&format!("{} LIMIT {}", sql, SAMPLE_LIMIT))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    } else {
        Vec::new()
    };

    Ok(IntegrityCheck {
        kind,
        table: table.to_string(),
        description,
        violations,
        sample_ids,
    })
}

fn foreign_key_check(conn: &Connection) -> Result<IntegrityCheck> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables: Vec<&str> = rows.iter().map(|(t, _)| t.as_str()).collect();
    tables.sort_unstable();
    tables.dedup();

    Ok(IntegrityCheck {
        kind: CheckKind::ForeignKey,
        table: tables.join(","),
        description: "SQLite foreign key constraints hold".to_string(),
        violations: rows.len() as i64,
        sample_ids: rows
            .iter()
            .filter_map(|(_, rowid)| *rowid)
            .take(SAMPLE_LIMIT)
            .collect(),
    })
}

/// Run every integrity check against the database
pub fn check_integrity(conn: &Connection) -> Result<IntegrityReport> {
    let mut checks = Vec::new();

    let fact_tables: Vec<&str> = DIMENSION_TABLES
        .iter()
        .map(|(table, _)| *table)
        .chain(std::iter::once(MARKETING))
        .collect();

    for table in &fact_tables {
        checks.push(run_check(
            conn,
            CheckKind::Orphan,
            table,
            format!("every {}.fact_id exists in {}", table, BANK_BASE),
            &format!(
                "SELECT t.fact_id FROM {t} t LEFT JOIN {b} b ON b.fact_id = t.fact_id WHERE b.fact_id IS NULL",
                t = table,
                b = BANK_BASE
            ),
        )?);

        checks.push(run_check(
            conn,
            CheckKind::Missing,
            table,
            format!("every {} row has a {} row", BANK_BASE, table),
            &format!(
                "SELECT b.fact_id FROM {b} b WHERE NOT EXISTS (SELECT 1 FROM {t} t WHERE t.fact_id = b.fact_id)",
                t = table,
                b = BANK_BASE
            ),
        )?);

        checks.push(run_check(
            conn,
            CheckKind::Duplicate,
            table,
            format!("{} holds at most one row per fact_id", table),
            &format!(
                "SELECT fact_id FROM {} GROUP BY fact_id HAVING COUNT(*) > 1",
                table
            ),
        )?);
    }

    for (dimension, key) in DIMENSION_TABLES {
        checks.push(run_check(
            conn,
            CheckKind::DanglingKey,
            MARKETING,
            format!("every {m}.{k} exists in {d}", m = MARKETING, k = key, d = dimension),
            &format!(
                "SELECT m.fact_id FROM {m} m LEFT JOIN {d} d ON d.{k} = m.{k} WHERE d.{k} IS NULL",
                m = MARKETING,
                d = dimension,
                k = key
            ),
        )?);

        checks.push(run_check(
            conn,
            CheckKind::CrossFact,
            MARKETING,
            format!("{m}.{k} points at the {d} row of the same fact", m = MARKETING, k = key, d = dimension),
            &format!(
                "SELECT m.fact_id FROM {m} m JOIN {d} d ON d.{k} = m.{k} WHERE d.fact_id <> m.fact_id",
                m = MARKETING,
                d = dimension,
                k = key
            ),
        )?);
    }

    checks.push(run_check(
        conn,
        CheckKind::OutcomeMismatch,
        MARKETING,
        format!("{}.subscribed matches {}.subscribed", MARKETING, BANK_BASE),
        &format!(
            "SELECT m.fact_id FROM {m} m JOIN {b} b ON b.fact_id = m.fact_id WHERE m.subscribed <> b.subscribed",
            m = MARKETING,
            b = BANK_BASE
        ),
    )?);

    checks.push(foreign_key_check(conn)?);

    let report = IntegrityReport { checks };
    if report.passed() {
        info!(checks = report.checks.len(), "integrity checks passed");
    } else {
        for failure in report.failures() {
            warn!(
                kind = ?failure.kind,
                table = %failure.table,
                violations = failure.violations,
                "integrity check failed: {}",
                failure.description
            );
        }
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
