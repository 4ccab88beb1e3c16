// 🔎 Query Interface - read-only SQL over the star schema
// Ad-hoc queries usually target the `data` view (all tables joined).

use crate::error::{MarketingError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ToSql};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Starting query for interactive use
pub const DEFAULT_QUERY: &str = "SELECT * FROM data LIMIT 10;";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// More rows matched than were returned
    pub truncated: bool,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Serialize as CSV with a header row (the "download CSV" payload)
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(cell_text))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| MarketingError::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| {
            MarketingError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Fixed-width text table; cells longer than `max_width` are cut
    pub fn render_table(&self, max_width: usize) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| truncate(&cell_text(v), max_width)).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|c| c.chars().count())
                    .chain(std::iter::once(truncate(name, max_width).chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let format_row = |values: Vec<String>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join(" │ ")
                .trim_end()
                .to_string()
        };

        let mut out = Vec::with_capacity(cells.len() + 2);
        out.push(format_row(
            self.columns.iter().map(|c| truncate(c, max_width)).collect(),
        ));
        out.push(
            widths
                .iter()
                .map(|w| "─".repeat(*w))
                .collect::<Vec<_>>()
                .join("─┼─"),
        );
        for row in cells {
            out.push(format_row(row));
        }

        out.join("\n")
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Strip whitespace and trailing semicolons; reject empty or multi-statement input
pub fn normalize_sql(sql: &str) -> Result<&str> {
    let trimmed = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return Err(MarketingError::EmptyQuery);
    }
    if has_statement_separator(trimmed) {
        return Err(MarketingError::MultipleStatements);
    }
    Ok(trimmed)
}

/// Statements allowed to start a query
const READ_KEYWORDS: [&str; 4] = ["SELECT", "WITH", "VALUES", "EXPLAIN"];

/// Skip leading whitespace, `--` line comments and `/* */` block comments
fn skip_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.find('\n').map_or("", |i| &after[i + 1..]);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
        } else {
            return trimmed;
        }
    }
}

/// Nothing but whitespace, comments and semicolons
fn only_trivia(sql: &str) -> bool {
    let mut rest = skip_trivia(sql);
    while let Some(after) = rest.strip_prefix(';') {
        rest = skip_trivia(after);
    }
    rest.is_empty()
}

/// First keyword of the statement, uppercased
fn leading_keyword(sql: &str) -> String {
    skip_trivia(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// A `;` followed by more SQL, outside literals, quoted identifiers and comments
fn has_statement_separator(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let rest = sql.get(i + 1..).unwrap_or("");
        let skip = match bytes[i] {
            b'\'' | b'"' | b'`' => rest.find(bytes[i] as char).map(|end| end + 1),
            b'[' => rest.find(']').map(|end| end + 1),
            b'-' if rest.starts_with('-') => rest.find('\n').map(|end| end + 1),
            b'/' if rest.starts_with('*') => rest[1..].find("*/").map(|end| end + 3),
            b';' if !only_trivia(rest) => return true,
            _ => Some(0),
        };
        match skip {
            Some(n) => i += n + 1,
            // Unterminated literal or comment runs to the end
            None => break,
        }
    }
    false
}

/// Run one read-only statement, keeping at most `max_rows` rows
pub fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryResult> {
    run_query_with_params(conn, sql, &[], max_rows)
}

pub fn run_query_with_params(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
    max_rows: usize,
) -> Result<QueryResult> {
    let sql = normalize_sql(sql)?;
    // Checked before prepare: flag pragmas take effect while compiling, and
    // readonly() alone lets transaction control and ATTACH through
    if !READ_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
        return Err(MarketingError::ReadOnlyViolation);
    }
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(MarketingError::ReadOnlyViolation);
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params)?;

    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(to_json))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        out.push(values);
    }

    debug!(rows = out.len(), truncated, "query executed");
    Ok(QueryResult {
        columns,
        rows: out,
        truncated,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_base_records, sample_record, setup_database};
    use crate::star::populate_star;

    fn populated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_base_records(
            &conn,
            &[
                sample_record(2, 30, "admin.", 100, false),
                sample_record(3, 50, "management", 300, true),
                sample_record(4, 65, "retired", 700, true),
            ],
        )
        .unwrap();
        populate_star(&conn).unwrap();
        conn
    }

    #[test]
    fn test_default_query_over_data_view() {
        let conn = populated();
        let result = run_query(&conn, DEFAULT_QUERY, 100).unwrap();

        assert_eq!(result.row_count(), 3);
        assert!(!result.truncated);
        assert!(result.columns.contains(&"subscribed_label".to_string()));
        assert_eq!(result.get(0, "job"), Some(&Value::from("admin.")));
        assert_eq!(result.get(2, "age_group"), Some(&Value::from("60+")));
    }

    #[test]
    fn test_max_rows_truncates() {
        let conn = populated();
        let result = run_query(&conn, "SELECT fact_id FROM data ORDER BY fact_id", 2).unwrap();

        assert_eq!(result.row_count(), 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_rejects_writes() {
        let conn = populated();

        let err = run_query(&conn, "DELETE FROM marketing", 10).unwrap_err();
        assert!(matches!(err, MarketingError::ReadOnlyViolation));

        let err = run_query(&conn, "DROP TABLE client", 10).unwrap_err();
        assert!(matches!(err, MarketingError::ReadOnlyViolation));

        // Nothing was removed
        let count = run_query(&conn, "SELECT COUNT(*) AS n FROM marketing", 1).unwrap();
        assert_eq!(count.get(0, "n"), Some(&Value::from(3)));
    }

    #[test]
    fn test_rejects_multiple_and_empty_statements() {
        let conn = populated();

        assert!(matches!(
            run_query(&conn, "SELECT 1; DELETE FROM client", 10),
            Err(MarketingError::MultipleStatements)
        ));
        assert!(matches!(run_query(&conn, "  ;  ", 10), Err(MarketingError::EmptyQuery)));

        // Semicolons inside literals are fine
        let result = run_query(&conn, "SELECT 'a;b' AS s;", 10).unwrap();
        assert_eq!(result.get(0, "s"), Some(&Value::from("a;b")));
    }

    #[test]
    fn test_rejects_attach_and_detach() {
        let conn = populated();
        let target = std::env::temp_dir().join(format!("attached-{}.db", uuid::Uuid::new_v4()));

        let attach = format!("ATTACH DATABASE '{}' AS other", target.display());
        let err = run_query(&conn, &attach, 10).unwrap_err();
        assert!(matches!(err, MarketingError::ReadOnlyViolation));
        assert!(!target.exists());

        assert!(matches!(
            run_query(&conn, "DETACH DATABASE other", 10),
            Err(MarketingError::ReadOnlyViolation)
        ));
    }

    #[test]
    fn test_rejects_pragma() {
        let conn = populated();

        assert!(matches!(
            run_query(&conn, "PRAGMA foreign_keys = OFF", 10),
            Err(MarketingError::ReadOnlyViolation)
        ));
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_rejects_transaction_control() {
        let conn = populated();

        for sql in [
            "BEGIN",
            "BEGIN IMMEDIATE",
            "COMMIT",
            "END",
            "ROLLBACK",
            "SAVEPOINT sp",
            "RELEASE sp",
        ] {
            assert!(
                matches!(run_query(&conn, sql, 10), Err(MarketingError::ReadOnlyViolation)),
                "{} was accepted",
                sql
            );
        }

        // No transaction was left open, so the rebuild can start its own
        assert!(conn.is_autocommit());
        populate_star(&conn).unwrap();
    }

    #[test]
    fn test_read_statements_are_allowed() {
        let conn = populated();

        let cte = run_query(&conn, "WITH x AS (SELECT 1 AS n) SELECT n FROM x", 10).unwrap();
        assert_eq!(cte.get(0, "n"), Some(&Value::from(1)));

        let values = run_query(&conn, "VALUES (1), (2)", 10).unwrap();
        assert_eq!(values.row_count(), 2);

        let plan = run_query(&conn, "EXPLAIN QUERY PLAN SELECT * FROM client", 10).unwrap();
        assert!(plan.row_count() > 0);

        let commented = run_query(&conn, "-- recent\n/* all */ select 2 AS n", 10).unwrap();
        assert_eq!(commented.get(0, "n"), Some(&Value::from(2)));

        // A comment cannot hide a write behind the keyword check
        assert!(matches!(
            run_query(&conn, "/* SELECT */ DELETE FROM marketing", 10),
            Err(MarketingError::ReadOnlyViolation)
        ));
    }

    #[test]
    fn test_semicolons_in_comments() {
        let conn = populated();

        let result = run_query(&conn, "SELECT 1 AS n -- a;b", 10).unwrap();
        assert_eq!(result.get(0, "n"), Some(&Value::from(1)));

        let result = run_query(&conn, "SELECT 1 AS n /* it's; fine */", 10).unwrap();
        assert_eq!(result.get(0, "n"), Some(&Value::from(1)));

        let result = run_query(&conn, "SELECT 1 AS n; -- trailing note", 10).unwrap();
        assert_eq!(result.row_count(), 1);

        // The quote inside the comment does not swallow the separator
        assert!(matches!(
            run_query(&conn, "SELECT 1 -- it's\n; DELETE FROM client", 10),
            Err(MarketingError::MultipleStatements)
        ));
        assert!(matches!(
            run_query(&conn, "SELECT 1 /* x */; DELETE FROM client", 10),
            Err(MarketingError::MultipleStatements)
        ));
    }

    #[test]
    fn test_syntax_error_is_user_error() {
        let conn = populated();

        for sql in [
            "SELEC * FROM data",
            "SELECT * FROM data WHER age > 1",
            "SELECT * FROM nowhere",
        ] {
            let err = run_query(&conn, sql, 10).unwrap_err();
            assert!(err.is_user_error(), "{}: {:?}", sql, err);
        }
    }

    #[test]
    fn test_params() {
        let conn = populated();
        let result = run_query_with_params(
            &conn,
            "SELECT fact_id FROM data WHERE age_group = ?1",
            &[&"45-59"],
            10,
        )
        .unwrap();

        assert_eq!(result.rows, vec![vec![Value::from(2)]]);
    }

    #[test]
    fn test_to_csv() {
        let result = QueryResult {
            columns: vec!["job".to_string(), "rate".to_string(), "note".to_string()],
            rows: vec![
                vec![Value::from("admin."), Value::from(0.5), Value::Null],
                vec![Value::from("a,b"), Value::from(1), Value::from("x")],
            ],
            truncated: false,
        };

        let csv = result.to_csv().unwrap();
        assert_eq!(csv, "job,rate,note\nadmin.,0.5,\n\"a,b\",1,x\n");
    }

    #[test]
    fn test_render_table() {
        let result = QueryResult {
            columns: vec!["id".to_string(), "job".to_string()],
            rows: vec![vec![Value::from(1), Value::from("blue-collar")]],
            truncated: false,
        };

        let table = result.render_table(6);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], "id │ job");
        assert_eq!(lines[2], "1  │ blue-…");
    }
}
