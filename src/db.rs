use crate::attributes::AttributeValue;
use crate::error::MarketingError;
use crate::schema::{self, BANK_BASE, STAR_TABLES};
use crate::star::AGE_GROUPS;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// One raw contact event as read from the dataset CSV
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BankRecord {
    // ========================================================================
    // CLIENT
    // ========================================================================
    pub age: i64,
    pub job: String,
    pub marital: String,
    pub education: String,
    pub credit_default: String,
    pub balance: Option<i64>,
    pub housing: String,
    pub loan: String,

    // ========================================================================
    // CONTACT
    // ========================================================================
    pub contact: String,
    pub day: i64,
    pub month: String,
    pub duration: i64,

    // ========================================================================
    // CAMPAIGN
    // ========================================================================
    pub campaign: i64,
    pub pdays: i64,
    pub previous: i64,
    pub poutcome: String,

    /// Outcome: client subscribed a term deposit
    pub subscribed: bool,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    pub source_file: String,
    /// Line in the source file (header is line 1)
    pub line_number: usize,
}

impl BankRecord {
    /// Hash of the record's position in its source plus its contents.
    /// Re-importing a file is a no-op, identical rows on different lines stay
    /// distinct events, and another file sharing the name still lands.
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}\n", self.source_file, self.line_number));
        hasher.update(self.content_fingerprint());
        format!("{:x}", hasher.finalize())
    }

    /// Every typed field, unit-separated
    fn content_fingerprint(&self) -> String {
        let balance = self.balance.map(|b| b.to_string()).unwrap_or_default();
        [
            self.age.to_string(),
            self.job.clone(),
            self.marital.clone(),
            self.education.clone(),
            self.credit_default.clone(),
            balance,
            self.housing.clone(),
            self.loan.clone(),
            self.contact.clone(),
            self.day.to_string(),
            self.month.clone(),
            self.duration.to_string(),
            self.campaign.to_string(),
            self.pdays.to_string(),
            self.previous.to_string(),
            self.poutcome.clone(),
            self.subscribed.to_string(),
        ]
        .join("\u{1f}")
    }

    /// Value of a dictionary column, for validation
    pub fn attribute_value(&self, name: &str) -> AttributeValue {
        match name {
            "age" => AttributeValue::Integer(self.age),
            "job" => AttributeValue::Text(self.job.clone()),
            "marital" => AttributeValue::Text(self.marital.clone()),
            "education" => AttributeValue::Text(self.education.clone()),
            "credit_default" => AttributeValue::Text(self.credit_default.clone()),
            "balance" => self
                .balance
                .map(AttributeValue::Integer)
                .unwrap_or(AttributeValue::Missing),
            "housing" => AttributeValue::Text(self.housing.clone()),
            "loan" => AttributeValue::Text(self.loan.clone()),
            "contact" => AttributeValue::Text(self.contact.clone()),
            "day" => AttributeValue::Integer(self.day),
            "month" => AttributeValue::Text(self.month.clone()),
            "duration" => AttributeValue::Integer(self.duration),
            "campaign" => AttributeValue::Integer(self.campaign),
            "pdays" => AttributeValue::Integer(self.pdays),
            "previous" => AttributeValue::Integer(self.previous),
            "poutcome" => AttributeValue::Text(self.poutcome.clone()),
            "subscribed" => AttributeValue::Flag(self.subscribed),
            _ => AttributeValue::Missing,
        }
    }
}

/// A bank_base row: the record plus its surrogate key
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRow {
    pub fact_id: i64,
    pub record: BankRecord,
}

/// One row of the joined marketing view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketingRow {
    pub fact_id: i64,
    pub client_id: i64,
    pub contact_id: i64,
    pub campaign_id: i64,
    pub age: i64,
    pub age_group: String,
    pub job: String,
    pub marital: String,
    pub education: String,
    pub credit_default: String,
    pub balance: Option<i64>,
    pub housing: String,
    pub loan: String,
    pub contact: String,
    pub month: String,
    pub day: i64,
    pub duration: i64,
    pub duration_length: String,
    pub campaign: i64,
    pub pdays: i64,
    pub previous: i64,
    pub poutcome: String,
    pub subscribed: bool,
    pub subscribed_label: String,
}

/// Result of one import run (also the import_log row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_read: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", 1)?;

    conn.execute_batch(&schema::render_ddl())
        .context("Failed to create star schema")?;

    // ==========================================================================
    // Import log (one row per import run)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT UNIQUE NOT NULL,
            source_file TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            rows_read INTEGER NOT NULL,
            rows_inserted INTEGER NOT NULL,
            rows_skipped INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CSV LOADING
// ============================================================================

const REQUIRED_HEADERS: &[&str] = &[
    "age", "job", "marital", "education", "default", "housing", "loan", "contact", "day",
    "month", "duration", "campaign", "pdays", "previous", "poutcome", "y",
];

/// `;` when the header carries more semicolons than commas (bank-full.csv), else `,`
pub fn detect_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Raw CSV row, every field as text
#[derive(Debug, Deserialize)]
struct RawBankRow {
    age: String,
    job: String,
    marital: String,
    education: String,
    #[serde(rename = "default")]
    credit_default: String,
    #[serde(default)]
    balance: Option<String>,
    housing: String,
    loan: String,
    contact: String,
    day: String,
    month: String,
    duration: String,
    campaign: String,
    pdays: String,
    previous: String,
    poutcome: String,
    y: String,
}

fn parse_int(field: &str, value: &str, line: usize) -> Result<i64, MarketingError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| MarketingError::InvalidValue {
            field: field.to_string(),
            line,
            value: value.to_string(),
        })
}

fn parse_subscribed(value: &str, line: usize) -> Result<bool, MarketingError> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "1" | "true" => Ok(true),
        "no" | "0" | "false" => Ok(false),
        _ => Err(MarketingError::InvalidValue {
            field: "y".to_string(),
            line,
            value: value.to_string(),
        }),
    }
}

impl RawBankRow {
    fn into_record(self, source_file: &str, line: usize) -> Result<BankRecord, MarketingError> {
        let balance = match self.balance.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(v) => Some(parse_int("balance", v, line)?),
        };

        Ok(BankRecord {
            age: parse_int("age", &self.age, line)?,
            job: self.job.trim().to_string(),
            marital: self.marital.trim().to_string(),
            education: self.education.trim().to_string(),
            credit_default: self.credit_default.trim().to_string(),
            balance,
            housing: self.housing.trim().to_string(),
            loan: self.loan.trim().to_string(),
            contact: self.contact.trim().to_string(),
            day: parse_int("day", &self.day, line)?,
            month: self.month.trim().to_lowercase(),
            duration: parse_int("duration", &self.duration, line)?,
            campaign: parse_int("campaign", &self.campaign, line)?,
            pdays: parse_int("pdays", &self.pdays, line)?,
            previous: parse_int("previous", &self.previous, line)?,
            poutcome: self.poutcome.trim().to_string(),
            subscribed: parse_subscribed(&self.y, line)?,
            source_file: source_file.to_string(),
            line_number: line,
        })
    }

    fn into_raw_record(self, source_file: &str, line: usize) -> RawRecord {
        let mut record = RawRecord {
            source_file: source_file.to_string(),
            line_number: line,
            values: HashMap::new(),
            invalid: Vec::new(),
        };

        for (field, text) in [
            ("age", &self.age),
            ("day", &self.day),
            ("duration", &self.duration),
            ("campaign", &self.campaign),
            ("pdays", &self.pdays),
            ("previous", &self.previous),
        ] {
            record.set_integer(field, text);
        }
        if let Some(balance) = &self.balance {
            record.set_integer("balance", balance);
        }

        for (field, text) in [
            ("job", self.job),
            ("marital", self.marital),
            ("education", self.education),
            ("credit_default", self.credit_default),
            ("housing", self.housing),
            ("loan", self.loan),
            ("contact", self.contact),
            ("month", self.month.to_lowercase()),
            ("poutcome", self.poutcome),
        ] {
            record.set_text(field, text);
        }

        match self.y.trim() {
            "" => {}
            y => match parse_subscribed(y, line) {
                Ok(flag) => {
                    record.values.insert("subscribed".to_string(), AttributeValue::Flag(flag));
                }
                Err(_) => record.invalid.push(("subscribed".to_string(), y.to_string())),
            },
        }

        record
    }
}

/// Columns of a dataset row, in file order
pub const RECORD_FIELDS: [&str; 17] = [
    "age", "job", "marital", "education", "credit_default", "balance", "housing", "loan",
    "contact", "day", "month", "duration", "campaign", "pdays", "previous", "poutcome",
    "subscribed",
];

/// A dataset row as dictionary values, before type conversion is enforced
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub source_file: String,
    pub line_number: usize,
    /// Converted cells; blank cells are absent
    pub values: HashMap<String, AttributeValue>,
    /// (field, cell text) for cells that did not convert to the column type
    pub invalid: Vec<(String, String)>,
}

impl RawRecord {
    pub fn attribute_value(&self, name: &str) -> AttributeValue {
        self.values
            .get(name)
            .cloned()
            .unwrap_or(AttributeValue::Missing)
    }

    /// "<source_file>:<line>"
    pub fn record_ref(&self) -> String {
        format!("{}:{}", self.source_file, self.line_number)
    }

    fn set_integer(&mut self, field: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match text.parse::<i64>() {
            Ok(v) => {
                self.values.insert(field.to_string(), AttributeValue::Integer(v));
            }
            Err(_) => self.invalid.push((field.to_string(), text.to_string())),
        }
    }

    fn set_text(&mut self, field: &str, text: String) {
        let text = text.trim();
        if !text.is_empty() {
            self.values
                .insert(field.to_string(), AttributeValue::Text(text.to_string()));
        }
    }
}

impl From<&BankRecord> for RawRecord {
    fn from(record: &BankRecord) -> Self {
        let values = RECORD_FIELDS
            .iter()
            .map(|field| (field.to_string(), record.attribute_value(field)))
            .filter(|(_, value)| *value != AttributeValue::Missing)
            .collect();

        RawRecord {
            source_file: record.source_file.clone(),
            line_number: record.line_number,
            values,
            invalid: Vec::new(),
        }
    }
}

/// CSV reader positioned after the header, plus the lowercased header and source file name
fn open_dataset(
    csv_path: &Path,
    delimiter: Option<u8>,
) -> Result<(csv::Reader<File>, csv::StringRecord, String)> {
    let delimiter = match delimiter {
        Some(d) => d,
        None => {
            let file = File::open(csv_path).context("Failed to open CSV file")?;
            let mut header_line = String::new();
            BufReader::new(file)
                .read_line(&mut header_line)
                .context("Failed to read CSV header")?;
            detect_delimiter(&header_line)
        }
    };
    debug!(delimiter = %(delimiter as char), "csv dialect");

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .context("Failed to open CSV file")?;

    // Headers are matched case-insensitively
    let headers: csv::StringRecord = rdr
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    for required in REQUIRED_HEADERS {
        if !headers.iter().any(|h| h == *required) {
            return Err(MarketingError::MissingColumn(required.to_string()).into());
        }
    }
    rdr.set_headers(headers.clone());

    let source_file = csv_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| csv_path.display().to_string());

    Ok((rdr, headers, source_file))
}

/// Read the dataset CSV. `delimiter: None` detects it from the header line.
pub fn load_csv(csv_path: &Path, delimiter: Option<u8>) -> Result<Vec<BankRecord>> {
    let (mut rdr, headers, source_file) = open_dataset(csv_path, delimiter)?;
    let mut records = Vec::new();

    for result in rdr.records() {
        let row = result.context("Failed to read CSV row")?;
        let line = row.position().map(|p| p.line() as usize).unwrap_or(0);

        let raw: RawBankRow = row
            .deserialize(Some(&headers))
            .map_err(MarketingError::from)
            .with_context(|| format!("Failed to deserialize row at line {}", line))?;

        records.push(raw.into_record(&source_file, line)?);
    }

    info!(rows = records.len(), source = %source_file, "loaded csv");
    Ok(records)
}

/// Read the dataset CSV without converting types. Blank or malformed cells stay
/// in the row so quality scoring can report them; only a broken CSV structure fails.
pub fn load_raw_csv(csv_path: &Path, delimiter: Option<u8>) -> Result<Vec<RawRecord>> {
    let (mut rdr, headers, source_file) = open_dataset(csv_path, delimiter)?;
    let mut records = Vec::new();

    for result in rdr.records() {
        let row = result.context("Failed to read CSV row")?;
        let line = row.position().map(|p| p.line() as usize).unwrap_or(0);

        let raw: RawBankRow = row
            .deserialize(Some(&headers))
            .map_err(MarketingError::from)
            .with_context(|| format!("Failed to deserialize row at line {}", line))?;

        records.push(raw.into_raw_record(&source_file, line));
    }

    info!(rows = records.len(), source = %source_file, "loaded csv for scoring");
    Ok(records)
}

// ============================================================================
// BASE IMPORT
// ============================================================================

/// Insert records into bank_base in one transaction.
/// Records already imported (same idempotency hash) are skipped.
pub fn insert_base_records(conn: &Connection, records: &[BankRecord]) -> Result<ImportSummary> {
    let started_at = Utc::now();
    let imported_at = started_at.to_rfc3339();
    let mut inserted = 0;
    let mut duplicates = 0;

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO bank_base (
                age, job, marital, education, credit_default, balance, housing, loan,
                contact, day, month, duration, campaign, pdays, previous, poutcome,
                subscribed, source_file, line_number, idempotency_hash, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        )?;

        for record in records {
            let result = stmt.execute(params![
                record.age,
                record.job,
                record.marital,
                record.education,
                record.credit_default,
                record.balance,
                record.housing,
                record.loan,
                record.contact,
                record.day,
                record.month,
                record.duration,
                record.campaign,
                record.pdays,
                record.previous,
                record.poutcome,
                record.subscribed,
                record.source_file,
                record.line_number as i64,
                record.compute_idempotency_hash(),
                imported_at,
            ]);

            match result {
                Ok(_) => inserted += 1,
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let summary = ImportSummary {
        batch_id: uuid::Uuid::new_v4().to_string(),
        source_file: records
            .first()
            .map(|r| r.source_file.clone())
            .unwrap_or_default(),
        started_at,
        finished_at: Utc::now(),
        rows_read: records.len(),
        rows_inserted: inserted,
        rows_skipped: duplicates,
    };
    insert_import_log(&tx, &summary)?;
    tx.commit()?;

    info!(inserted, skipped = duplicates, batch = %summary.batch_id, "imported base records");
    if duplicates > 0 {
        warn!(
            duplicates,
            source = %summary.source_file,
            "rows already imported with the same file, line and contents were skipped"
        );
    }

    Ok(summary)
}

fn insert_import_log(conn: &Connection, summary: &ImportSummary) -> Result<()> {
    conn.execute(
        "INSERT INTO import_log (
            batch_id, source_file, started_at, finished_at, rows_read, rows_inserted, rows_skipped
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            summary.batch_id,
            summary.source_file,
            summary.started_at.to_rfc3339(),
            summary.finished_at.to_rfc3339(),
            summary.rows_read as i64,
            summary.rows_inserted as i64,
            summary.rows_skipped as i64,
        ],
    )?;

    Ok(())
}

/// Import runs, newest first
pub fn get_import_log(conn: &Connection) -> Result<Vec<ImportSummary>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, source_file, started_at, finished_at, rows_read, rows_inserted, rows_skipped
         FROM import_log
         ORDER BY id DESC",
    )?;

    let parse_time = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
    };

    let entries = stmt
        .query_map([], |row| {
            Ok(ImportSummary {
                batch_id: row.get(0)?,
                source_file: row.get(1)?,
                started_at: parse_time(row.get(2)?)?,
                finished_at: parse_time(row.get(3)?)?,
                rows_read: row.get::<_, i64>(4)? as usize,
                rows_inserted: row.get::<_, i64>(5)? as usize,
                rows_skipped: row.get::<_, i64>(6)? as usize,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

// ============================================================================
// READERS
// ============================================================================

/// Row count of a star table; unknown names are rejected
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, MarketingError> {
    if !STAR_TABLES.contains(&table) {
        return Err(MarketingError::UnknownTable(table.to_string()));
    }
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;

    Ok(count)
}

/// Row counts of all five tables
pub fn table_counts(conn: &Connection) -> Result<HashMap<String, i64>> {
    let mut counts = HashMap::new();
    for table in STAR_TABLES {
        counts.insert(table.to_string(), count_rows(conn, table)?);
    }
    Ok(counts)
}

const BASE_SELECT: &str = "SELECT fact_id, age, job, marital, education, credit_default, balance,
        housing, loan, contact, day, month, duration, campaign, pdays, previous,
        poutcome, subscribed, source_file, line_number
     FROM bank_base";

fn base_row_from(row: &Row) -> rusqlite::Result<BaseRow> {
    Ok(BaseRow {
        fact_id: row.get(0)?,
        record: BankRecord {
            age: row.get(1)?,
            job: row.get(2)?,
            marital: row.get(3)?,
            education: row.get(4)?,
            credit_default: row.get(5)?,
            balance: row.get(6)?,
            housing: row.get(7)?,
            loan: row.get(8)?,
            contact: row.get(9)?,
            day: row.get(10)?,
            month: row.get(11)?,
            duration: row.get(12)?,
            campaign: row.get(13)?,
            pdays: row.get(14)?,
            previous: row.get(15)?,
            poutcome: row.get(16)?,
            subscribed: row.get(17)?,
            source_file: row.get(18)?,
            line_number: row.get::<_, i64>(19)? as usize,
        },
    })
}

/// All bank_base rows in fact_id order
pub fn get_base_rows(conn: &Connection) -> Result<Vec<BaseRow>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY fact_id", BASE_SELECT))?;
    let rows = stmt
        .query_map([], base_row_from)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// bank_base rows that have no marketing fact yet, in fact_id order
pub fn get_unprojected_base_rows(conn: &Connection) -> Result<Vec<BaseRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE fact_id NOT IN (SELECT fact_id FROM {}) ORDER BY fact_id",
        BASE_SELECT,
        schema::MARKETING
    ))?;
    let rows = stmt
        .query_map([], base_row_from)?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(rows = rows.len(), table = BANK_BASE, "unprojected rows");
    Ok(rows)
}

const MARKETING_SELECT: &str = "SELECT fact_id, client_id, contact_id, campaign_id, age, age_group,
        job, marital, education, credit_default, balance, housing, loan, contact, month,
        day, duration, duration_length, campaign, pdays, previous, poutcome, subscribed,
        subscribed_label
     FROM marketing_view
     WHERE age IS NOT NULL AND contact IS NOT NULL AND campaign IS NOT NULL";

fn marketing_row_from(row: &Row) -> rusqlite::Result<MarketingRow> {
    Ok(MarketingRow {
        fact_id: row.get(0)?,
        client_id: row.get(1)?,
        contact_id: row.get(2)?,
        campaign_id: row.get(3)?,
        age: row.get(4)?,
        age_group: row.get(5)?,
        job: row.get(6)?,
        marital: row.get(7)?,
        education: row.get(8)?,
        credit_default: row.get(9)?,
        balance: row.get(10)?,
        housing: row.get(11)?,
        loan: row.get(12)?,
        contact: row.get(13)?,
        month: row.get(14)?,
        day: row.get(15)?,
        duration: row.get(16)?,
        duration_length: row.get(17)?,
        campaign: row.get(18)?,
        pdays: row.get(19)?,
        previous: row.get(20)?,
        poutcome: row.get(21)?,
        subscribed: row.get(22)?,
        subscribed_label: row.get(23)?,
    })
}

/// Joined fact rows ordered by fact_id
pub fn get_marketing_rows(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<MarketingRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY fact_id LIMIT ?1 OFFSET ?2",
        MARKETING_SELECT
    ))?;

    let rows = stmt
        .query_map(params![limit as i64, offset as i64], marketing_row_from)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Every joined fact row
pub fn get_all_marketing_rows(conn: &Connection) -> Result<Vec<MarketingRow>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY fact_id", MARKETING_SELECT))?;
    let rows = stmt
        .query_map([], marketing_row_from)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Joined fact rows of one age group
pub fn get_marketing_rows_by_age_group(
    conn: &Connection,
    age_group: &str,
) -> Result<Vec<MarketingRow>, MarketingError> {
    if !AGE_GROUPS.contains(&age_group) {
        return Err(MarketingError::UnknownAgeGroup(age_group.to_string()));
    }

    let mut stmt = conn.prepare(&format!(
        "{} AND age_group = ?1 ORDER BY fact_id",
        MARKETING_SELECT
    ))?;
    let rows = stmt
        .query_map([age_group], marketing_row_from)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
pub(crate) fn sample_record(line: usize, age: i64, job: &str, duration: i64, subscribed: bool) -> BankRecord {
    BankRecord {
        age,
        job: job.to_string(),
        marital: "married".to_string(),
        education: "secondary".to_string(),
        credit_default: "no".to_string(),
        balance: Some(1200),
        housing: "yes".to_string(),
        loan: "no".to_string(),
        contact: "cellular".to_string(),
        day: 15,
        month: "may".to_string(),
        duration,
        campaign: 2,
        pdays: -1,
        previous: 0,
        poutcome: "unknown".to_string(),
        subscribed,
        source_file: "bank.csv".to_string(),
        line_number: line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_csv(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("bank-{}.csv", uuid::Uuid::new_v4()));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const UCI_HEADER: &str = "\"age\";\"job\";\"marital\";\"education\";\"default\";\"balance\";\"housing\";\"loan\";\"contact\";\"day\";\"month\";\"duration\";\"campaign\";\"pdays\";\"previous\";\"poutcome\";\"y\"";

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(UCI_HEADER), b';');
        assert_eq!(detect_delimiter("age,job,marital"), b',');
    }

    #[test]
    fn test_load_semicolon_csv() {
        let csv = format!(
            "{}\n30;\"unemployed\";\"married\";\"primary\";\"no\";1787;\"no\";\"no\";\"cellular\";19;\"oct\";79;1;-1;0;\"unknown\";\"no\"\n33;\"services\";\"married\";\"secondary\";\"no\";4789;\"yes\";\"yes\";\"cellular\";11;\"may\";220;1;339;4;\"failure\";\"yes\"\n",
            UCI_HEADER
        );
        let path = write_temp_csv(&csv);

        let records = load_csv(&path, None).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].age, 30);
        assert_eq!(records[0].job, "unemployed");
        assert_eq!(records[0].balance, Some(1787));
        assert!(!records[0].subscribed);
        assert_eq!(records[0].line_number, 2);
        assert_eq!(records[1].poutcome, "failure");
        assert!(records[1].subscribed);
        assert_eq!(records[1].line_number, 3);
    }

    #[test]
    fn test_load_comma_csv_without_balance() {
        let csv = "Age,Job,Marital,Education,Default,Housing,Loan,Contact,Day,Month,Duration,Campaign,Pdays,Previous,Poutcome,Y\n\
                   45,technician,single,tertiary,no,yes,no,telephone,5,Jun,600,3,-1,0,unknown,no\n";
        let path = write_temp_csv(csv);

        let records = load_csv(&path, None).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].balance, None);
        assert_eq!(records[0].month, "jun");
    }

    #[test]
    fn test_load_reports_bad_value_with_line() {
        let csv = "age,job,marital,education,default,housing,loan,contact,day,month,duration,campaign,pdays,previous,poutcome,y\n\
                   abc,technician,single,tertiary,no,yes,no,telephone,5,jun,600,3,-1,0,unknown,no\n";
        let path = write_temp_csv(csv);

        let err = load_csv(&path, None).unwrap_err();
        std::fs::remove_file(&path).ok();

        let domain = err.downcast_ref::<MarketingError>().unwrap();
        match domain {
            MarketingError::InvalidValue { field, line, .. } => {
                assert_eq!(field, "age");
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_load_raw_keeps_malformed_rows() {
        let csv = "age,job,marital,education,default,housing,loan,contact,day,month,duration,campaign,pdays,previous,poutcome,y\n\
                   45,technician,single,tertiary,no,yes,no,telephone,5,Jun,600,3,-1,0,unknown,no\n\
                   ,admin.,married,secondary,no,no,no,cellular,7,may,90,1,-1,0,unknown,yes\n\
                   38,services,single,primary,no,no,no,cellular,8,may,abc,1,-1,0,unknown,maybe\n";
        let path = write_temp_csv(csv);

        // The strict loader stops at line 3, the lenient one keeps every row
        assert!(load_csv(&path, None).is_err());
        let records = load_raw_csv(&path, None).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].line_number, 2);
        assert!(records[0].invalid.is_empty());
        assert_eq!(records[0].attribute_value("month"), AttributeValue::Text("jun".to_string()));
        assert_eq!(records[0].attribute_value("balance"), AttributeValue::Missing);

        assert_eq!(records[1].attribute_value("age"), AttributeValue::Missing);
        assert_eq!(records[1].attribute_value("subscribed"), AttributeValue::Flag(true));
        assert!(records[1].invalid.is_empty());

        assert_eq!(records[2].record_ref(), format!("{}:4", records[2].source_file));
        assert_eq!(
            records[2].invalid,
            vec![
                ("duration".to_string(), "abc".to_string()),
                ("subscribed".to_string(), "maybe".to_string()),
            ]
        );
        assert_eq!(records[2].attribute_value("duration"), AttributeValue::Missing);
    }

    #[test]
    fn test_load_missing_column() {
        let path = write_temp_csv("age,job\n30,admin.\n");

        let err = load_csv(&path, None).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            err.downcast_ref::<MarketingError>(),
            Some(MarketingError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_idempotency_import_twice() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let records = vec![
            sample_record(2, 30, "admin.", 120, false),
            sample_record(3, 41, "management", 400, true),
            // Same values, different line: a distinct contact event
            sample_record(4, 41, "management", 400, true),
        ];

        let first = insert_base_records(&conn, &records).unwrap();
        let second = insert_base_records(&conn, &records).unwrap();

        assert_eq!(first.rows_inserted, 3);
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.rows_skipped, 3);
        assert_eq!(count_rows(&conn, BANK_BASE).unwrap(), 3);

        let log = get_import_log(&conn).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].batch_id, second.batch_id);

        println!("✅ Idempotency test PASSED");
    }

    #[test]
    fn test_compute_idempotency_hash() {
        let a = sample_record(2, 30, "admin.", 120, false);
        let mut b = a.clone();
        b.line_number = 3;

        assert_eq!(a.compute_idempotency_hash(), a.compute_idempotency_hash());
        assert_ne!(a.compute_idempotency_hash(), b.compute_idempotency_hash());
        assert_eq!(a.compute_idempotency_hash().len(), 64);

        let mut c = a.clone();
        c.duration = 121;
        assert_ne!(a.compute_idempotency_hash(), c.compute_idempotency_hash());
    }

    #[test]
    fn test_same_file_name_with_new_contents_is_imported() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        // /v1/bank.csv and /v2/bank.csv both land as "bank.csv"
        let v1 = vec![
            sample_record(2, 30, "admin.", 120, false),
            sample_record(3, 41, "management", 400, true),
        ];
        let mut v2 = v1.clone();
        v2[1].duration = 410;
        v2[1].subscribed = false;

        insert_base_records(&conn, &v1).unwrap();
        let second = insert_base_records(&conn, &v2).unwrap();

        assert_eq!(second.rows_inserted, 1);
        assert_eq!(second.rows_skipped, 1);
        assert_eq!(count_rows(&conn, BANK_BASE).unwrap(), 3);
    }

    #[test]
    fn test_base_rows_round_trip_through_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut record = sample_record(2, 58, "retired", 30, true);
        record.balance = None;
        insert_base_records(&conn, &[record.clone()]).unwrap();

        let rows = get_base_rows(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record, record);
    }

    #[test]
    fn test_count_rows_rejects_unknown_table() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert!(matches!(
            count_rows(&conn, "sqlite_master; DROP TABLE client"),
            Err(MarketingError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_age_group_filter_rejects_unknown_group() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert!(matches!(
            get_marketing_rows_by_age_group(&conn, "teens"),
            Err(MarketingError::UnknownAgeGroup(_))
        ));
    }
}
