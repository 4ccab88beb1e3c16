// ⭐ Star Projection - bank_base → client / contact / campaign / marketing
// Each base row yields exactly one row per dimension and one fact row

use crate::db::{self, BaseRow};
use crate::schema::{self, STAR_TABLES};
use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// DERIVED COLUMNS
// ============================================================================

pub const AGE_GROUPS: [&str; 4] = ["18-29", "30-44", "45-59", "60+"];
pub const DURATION_LENGTHS: [&str; 3] = ["short", "medium", "long"];

/// Contacts shorter than this are "short" (seconds)
pub const SHORT_CONTACT_SECS: i64 = 180;
/// Contacts at least this long are "long" (seconds)
pub const LONG_CONTACT_SECS: i64 = 600;

/// Ages under 18 fall in the youngest bucket
pub fn assign_age_group(age: i64) -> &'static str {
    match age {
        i64::MIN..=29 => AGE_GROUPS[0],
        30..=44 => AGE_GROUPS[1],
        45..=59 => AGE_GROUPS[2],
        _ => AGE_GROUPS[3],
    }
}

pub fn assign_duration_length(seconds: i64) -> &'static str {
    if seconds < SHORT_CONTACT_SECS {
        DURATION_LENGTHS[0]
    } else if seconds < LONG_CONTACT_SECS {
        DURATION_LENGTHS[1]
    } else {
        DURATION_LENGTHS[2]
    }
}

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRow {
    pub client_id: i64,
    pub fact_id: i64,
    pub age: i64,
    pub age_group: String,
    pub job: String,
    pub marital: String,
    pub education: String,
    pub credit_default: String,
    pub housing: String,
    pub loan: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactRow {
    pub contact_id: i64,
    pub fact_id: i64,
    pub contact: String,
    pub month: String,
    pub day: i64,
    pub duration: i64,
    pub duration_length: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignRow {
    pub campaign_id: i64,
    pub fact_id: i64,
    pub campaign: i64,
    pub pdays: i64,
    pub previous: i64,
    pub poutcome: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketingFact {
    pub fact_id: i64,
    pub client_id: i64,
    pub contact_id: i64,
    pub campaign_id: i64,
    pub subscribed: bool,
}

/// Next surrogate key per dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextIds {
    pub client_id: i64,
    pub contact_id: i64,
    pub campaign_id: i64,
}

impl Default for NextIds {
    fn default() -> Self {
        NextIds {
            client_id: 1,
            contact_id: 1,
            campaign_id: 1,
        }
    }
}

impl NextIds {
    /// MAX(id) + 1 for each dimension table
    pub fn from_database(conn: &Connection) -> Result<Self> {
        let next = |table: &str, key: &str| -> Result<i64> {
            let id: i64 = conn.query_row(
                &format!("SELECT COALESCE(MAX({}), 0) + 1 FROM {}", key, table),
                [],
                |row| row.get(0),
            )?;
            Ok(id)
        };

        Ok(NextIds {
            client_id: next(schema::CLIENT, "client_id")?,
            contact_id: next(schema::CONTACT, "contact_id")?,
            campaign_id: next(schema::CAMPAIGN, "campaign_id")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarBatch {
    pub clients: Vec<ClientRow>,
    pub contacts: Vec<ContactRow>,
    pub campaigns: Vec<CampaignRow>,
    pub facts: Vec<MarketingFact>,
}

impl StarBatch {
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StarSummary {
    pub facts_projected: usize,
    pub total_facts: i64,
}

// ============================================================================
// PROJECTION
// ============================================================================

/// Project base rows into the star. Surrogate ids are allocated from `next`
/// in fact_id order, one per row and table.
pub fn project(rows: &[BaseRow], next: NextIds) -> StarBatch {
    let mut ordered: Vec<&BaseRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.fact_id);
    ordered.dedup_by_key(|r| r.fact_id);

    let mut batch = StarBatch::default();
    let mut ids = next;

    for base in ordered {
        let r = &base.record;

        let client_id = ids.client_id;
        let contact_id = ids.contact_id;
        let campaign_id = ids.campaign_id;
        ids.client_id += 1;
        ids.contact_id += 1;
        ids.campaign_id += 1;

        batch.clients.push(ClientRow {
            client_id,
            fact_id: base.fact_id,
            age: r.age,
            age_group: assign_age_group(r.age).to_string(),
            job: r.job.clone(),
            marital: r.marital.clone(),
            education: r.education.clone(),
            credit_default: r.credit_default.clone(),
            housing: r.housing.clone(),
            loan: r.loan.clone(),
        });

        batch.contacts.push(ContactRow {
            contact_id,
            fact_id: base.fact_id,
            contact: r.contact.clone(),
            month: r.month.clone(),
            day: r.day,
            duration: r.duration,
            duration_length: assign_duration_length(r.duration).to_string(),
        });

        batch.campaigns.push(CampaignRow {
            campaign_id,
            fact_id: base.fact_id,
            campaign: r.campaign,
            pdays: r.pdays,
            previous: r.previous,
            poutcome: r.poutcome.clone(),
        });

        batch.facts.push(MarketingFact {
            fact_id: base.fact_id,
            client_id,
            contact_id,
            campaign_id,
            subscribed: r.subscribed,
        });
    }

    batch
}

fn insert_batch(conn: &Connection, batch: &StarBatch) -> Result<()> {
    let mut client_stmt = conn.prepare(
        "INSERT INTO client (client_id, fact_id, age, age_group, job, marital, education,
                             credit_default, housing, loan)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for c in &batch.clients {
        client_stmt.execute(params![
            c.client_id,
            c.fact_id,
            c.age,
            c.age_group,
            c.job,
            c.marital,
            c.education,
            c.credit_default,
            c.housing,
            c.loan,
        ])?;
    }

    let mut contact_stmt = conn.prepare(
        "INSERT INTO contact (contact_id, fact_id, contact, month, day, duration, duration_length)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for c in &batch.contacts {
        contact_stmt.execute(params![
            c.contact_id,
            c.fact_id,
            c.contact,
            c.month,
            c.day,
            c.duration,
            c.duration_length,
        ])?;
    }

    let mut campaign_stmt = conn.prepare(
        "INSERT INTO campaign (campaign_id, fact_id, campaign, pdays, previous, poutcome)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for c in &batch.campaigns {
        campaign_stmt.execute(params![
            c.campaign_id,
            c.fact_id,
            c.campaign,
            c.pdays,
            c.previous,
            c.poutcome,
        ])?;
    }

    let mut fact_stmt = conn.prepare(
        "INSERT INTO marketing (fact_id, client_id, contact_id, campaign_id, subscribed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for f in &batch.facts {
        fact_stmt.execute(params![
            f.fact_id,
            f.client_id,
            f.contact_id,
            f.campaign_id,
            f.subscribed,
        ])?;
    }

    Ok(())
}

/// Project every base row that has no marketing fact yet. Running it twice is a no-op.
pub fn populate_star(conn: &Connection) -> Result<StarSummary> {
    let tx = conn.unchecked_transaction()?;

    let pending = db::get_unprojected_base_rows(&tx)?;
    let next = NextIds::from_database(&tx)?;
    let batch = project(&pending, next);

    insert_batch(&tx, &batch).context("Failed to insert star rows")?;
    tx.commit()?;

    let total_facts = db::count_rows(conn, schema::MARKETING)?;
    info!(projected = batch.len(), total_facts, "star schema populated");

    Ok(StarSummary {
        facts_projected: batch.len(),
        total_facts,
    })
}

// ============================================================================
// EXPORT
// ============================================================================

fn value_to_field(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

/// Write one table to CSV, ordered by its primary key
pub fn export_table(conn: &Connection, table: &str, path: &Path) -> Result<usize> {
    let definition = schema::table(table)
        .ok_or_else(|| crate::error::MarketingError::UnknownTable(table.to_string()))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} ORDER BY {}",
        definition.name, definition.primary_key
    ))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(&columns)?;

    let mut rows = stmt.query([])?;
    let mut written = 0;
    while let Some(row) = rows.next()? {
        let fields = (0..columns.len())
            .map(|i| row.get_ref(i).map(value_to_field))
            .collect::<Result<Vec<_>, _>>()?;
        writer.write_record(&fields)?;
        written += 1;
    }
    writer.flush()?;

    Ok(written)
}

/// One CSV per star table: `<dir>/<table>.csv`
pub fn export_star(conn: &Connection, dir: &Path) -> Result<Vec<(PathBuf, usize)>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let mut written = Vec::new();
    for table in STAR_TABLES {
        let path = dir.join(format!("{}.csv", table));
        let rows = export_table(conn, table, &path)?;
        info!(table, rows, path = %path.display(), "exported table");
        written.push((path, rows));
    }

    Ok(written)
}

// ============================================================================
// TESTS
// ============================================================================
