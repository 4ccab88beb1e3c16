// 📊 Exploratory Analysis over the joined marketing view
// Summary statistics plus the numbers behind each exploration chart.

use crate::error::MarketingError;
use crate::query::{self, QueryResult};
use crate::star::{AGE_GROUPS, DURATION_LENGTHS};
use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

/// Numeric columns described by `summary_statistics`
pub const NUMERIC_COLUMNS: [&str; 8] = [
    "age", "balance", "day", "duration", "campaign", "pdays", "previous", "subscribed",
];

// ============================================================================
// TYPES
// ============================================================================

/// count/mean/std/min/quartiles/max of one column; None when undefined
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1)
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationOutcome {
    pub duration_length: String,
    pub contacts: usize,
    pub subscribed: usize,
    pub subscription_rate: f64,
    pub min_duration: Option<i64>,
    pub median_duration: Option<f64>,
    pub max_duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSubscription {
    pub job: String,
    pub subscribed: i64,
    pub not_subscribed: i64,
    pub subscription_rate: f64,
}

/// Everything the exploration views show, in one snapshot
#[derive(Debug, Clone, Serialize)]
pub struct Exploration {
    pub total_contacts: i64,
    pub subscription_rate: f64,
    pub summary: Vec<ColumnSummary>,
    pub age_groups: Vec<CategoryCount>,
    pub subscriptions: Vec<CategoryCount>,
    pub durations: Vec<DurationOutcome>,
    pub jobs: Vec<JobSubscription>,
}

// ============================================================================
// STATISTICS HELPERS
// ============================================================================

/// Quantile of sorted values with linear interpolation between closest ranks
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

pub fn describe(column: &str, values: &[f64]) -> ColumnSummary {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len();
    let mean = (count > 0).then(|| sorted.iter().sum::<f64>() / count as f64);
    let std = match (mean, count) {
        (Some(m), n) if n > 1 => {
            let var = sorted.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
            Some(var.sqrt())
        }
        _ => None,
    };

    ColumnSummary {
        column: column.to_string(),
        count,
        mean,
        std,
        min: sorted.first().copied(),
        q25: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q75: quantile(&sorted, 0.75),
        max: sorted.last().copied(),
    }
}

fn rate(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

// ============================================================================
// ANALYSES
// ============================================================================

/// Describe every numeric column of the joined view
pub fn summary_statistics(conn: &Connection) -> Result<Vec<ColumnSummary>> {
    NUMERIC_COLUMNS
        .iter()
        .map(|column| -> Result<ColumnSummary> {
            let mut stmt = conn.prepare(&format!(
                "SELECT CAST({c} AS REAL) FROM marketing_view WHERE {c} IS NOT NULL",
                c = column
            ))?;
            let values = stmt
                .query_map([], |row| row.get::<_, f64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(describe(column, &values))
        })
        .collect()
}

/// Contacts per age group, most frequent first
pub fn age_group_distribution(conn: &Connection) -> Result<Vec<CategoryCount>> {
    category_counts(
        conn,
        "SELECT age_group, COUNT(*) FROM marketing_view
         WHERE age_group IS NOT NULL
         GROUP BY age_group
         ORDER BY COUNT(*) DESC, age_group",
    )
}

/// Contacts per outcome label, most frequent first
pub fn subscription_distribution(conn: &Connection) -> Result<Vec<CategoryCount>> {
    category_counts(
        conn,
        "SELECT subscribed_label, COUNT(*) FROM marketing_view
         GROUP BY subscribed_label
         ORDER BY COUNT(*) DESC, subscribed_label",
    )
}

fn category_counts(conn: &Connection, sql: &str) -> Result<Vec<CategoryCount>> {
    let mut stmt = conn.prepare(sql)?;
    let counts = stmt
        .query_map([], |row| {
            Ok(CategoryCount {
                label: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

/// Contact duration against outcome, one entry per duration bucket (short → long)
pub fn duration_vs_outcome(conn: &Connection) -> Result<Vec<DurationOutcome>> {
    let mut stmt = conn.prepare(
        "SELECT duration_length, duration, subscribed FROM marketing_view
         WHERE duration_length IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let outcomes = DURATION_LENGTHS
        .iter()
        .map(|bucket| {
            let mut durations: Vec<i64> = Vec::new();
            let mut subscribed = 0;
            for (_, duration, outcome) in rows.iter().filter(|(l, _, _)| l == bucket) {
                durations.push(*duration);
                if *outcome {
                    subscribed += 1;
                }
            }
            durations.sort_unstable();
            let as_f64: Vec<f64> = durations.iter().map(|d| *d as f64).collect();

            DurationOutcome {
                duration_length: bucket.to_string(),
                contacts: durations.len(),
                subscribed,
                subscription_rate: rate(subscribed as i64, durations.len() as i64),
                min_duration: durations.first().copied(),
                median_duration: quantile(&as_f64, 0.5),
                max_duration: durations.last().copied(),
            }
        })
        .collect();

    Ok(outcomes)
}

/// Subscribed / not subscribed per job, ordered by job name
pub fn subscription_by_job(conn: &Connection) -> Result<Vec<JobSubscription>> {
    let mut stmt = conn.prepare(
        "SELECT job, SUM(subscribed), COUNT(*) - SUM(subscribed) FROM marketing_view
         WHERE job IS NOT NULL
         GROUP BY job
         ORDER BY job",
    )?;
    let jobs = stmt
        .query_map([], |row| {
            let subscribed: i64 = row.get(1)?;
            let not_subscribed: i64 = row.get(2)?;
            Ok(JobSubscription {
                job: row.get(0)?,
                subscribed,
                not_subscribed,
                subscription_rate: rate(subscribed, subscribed + not_subscribed),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// First `n` rows of the joined data
pub fn preview(conn: &Connection, n: usize) -> Result<QueryResult> {
    let sql = format!("SELECT * FROM data ORDER BY fact_id LIMIT {}", n);
    Ok(query::run_query(conn, &sql, n)?)
}

/// Joined rows of one age group
pub fn filter_by_age_group(conn: &Connection, age_group: &str, max_rows: usize) -> Result<QueryResult> {
    if !AGE_GROUPS.contains(&age_group) {
        return Err(MarketingError::UnknownAgeGroup(age_group.to_string()).into());
    }
    Ok(query::run_query_with_params(
        conn,
        "SELECT * FROM data WHERE age_group = ?1 ORDER BY fact_id",
        &[&age_group],
        max_rows,
    )?)
}

/// All exploration numbers at once
pub fn explore(conn: &Connection) -> Result<Exploration> {
    let subscriptions = subscription_distribution(conn)?;
    let total_contacts: i64 = subscriptions.iter().map(|c| c.count).sum();
    let subscribed: i64 = subscriptions
        .iter()
        .filter(|c| c.label == "Subscribed")
        .map(|c| c.count)
        .sum();

    Ok(Exploration {
        total_contacts,
        subscription_rate: rate(subscribed, total_contacts),
        summary: summary_statistics(conn)?,
        age_groups: age_group_distribution(conn)?,
        subscriptions,
        durations: duration_vs_outcome(conn)?,
        jobs: subscription_by_job(conn)?,
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
                sample_record(2, 25, "admin.", 100, false),
                sample_record(3, 27, "student", 650, true),
                sample_record(4, 35, "admin.", 300, true),
                sample_record(5, 52, "management", 90, false),
                sample_record(6, 61, "retired", 900, true),
            ],
        )
        .unwrap();
        populate_star(&conn).unwrap();
        conn
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let values = [1.0, 2.0, 3.0, 4.0];

        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_describe() {
        let summary = describe("x", &[4.0, 2.0, 6.0]);

        assert_eq!(summary.count, 3);
        assert_eq!(summary.mean, Some(4.0));
        assert_eq!(summary.std, Some(2.0));
        assert_eq!(summary.min, Some(2.0));
        assert_eq!(summary.median, Some(4.0));
        assert_eq!(summary.max, Some(6.0));

        let single = describe("y", &[5.0]);
        assert_eq!(single.std, None);
        assert_eq!(describe("z", &[]).mean, None);
    }

    #[test]
    fn test_summary_statistics() {
        let conn = populated();
        let summary = summary_statistics(&conn).unwrap();

        assert_eq!(summary.len(), NUMERIC_COLUMNS.len());
        let age = summary.iter().find(|s| s.column == "age").unwrap();
        assert_eq!(age.count, 5);
        assert_eq!(age.mean, Some(40.0));
        assert_eq!(age.median, Some(35.0));

        let subscribed = summary.iter().find(|s| s.column == "subscribed").unwrap();
        assert_eq!(subscribed.mean, Some(0.6));
    }

    #[test]
    fn test_age_group_distribution() {
        let conn = populated();
        let groups = age_group_distribution(&conn).unwrap();

        assert_eq!(groups[0], CategoryCount { label: "18-29".to_string(), count: 2 });
        assert_eq!(groups.iter().map(|g| g.count).sum::<i64>(), 5);
    }

    #[test]
    fn test_subscription_distribution() {
        let conn = populated();
        let dist = subscription_distribution(&conn).unwrap();

        assert_eq!(
            dist,
            vec![
                CategoryCount { label: "Subscribed".to_string(), count: 3 },
                CategoryCount { label: "Not Subscribed".to_string(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_duration_vs_outcome() {
        let conn = populated();
        let durations = duration_vs_outcome(&conn).unwrap();

        assert_eq!(durations.len(), 3);
        let short = &durations[0];
        assert_eq!(short.duration_length, "short");
        assert_eq!(short.contacts, 2);
        assert_eq!(short.subscribed, 0);
        assert_eq!(short.median_duration, Some(95.0));

        let long = &durations[2];
        assert_eq!(long.contacts, 2);
        assert_eq!(long.subscription_rate, 1.0);
        assert_eq!(long.max_duration, Some(900));
    }

    #[test]
    fn test_subscription_by_job() {
        let conn = populated();
        let jobs = subscription_by_job(&conn).unwrap();

        assert_eq!(jobs[0].job, "admin.");
        assert_eq!(jobs[0].subscribed, 1);
        assert_eq!(jobs[0].not_subscribed, 1);
        assert_eq!(jobs[0].subscription_rate, 0.5);
        assert_eq!(jobs.len(), 4);
    }

    #[test]
    fn test_preview_and_filter() {
        let conn = populated();

        let head = preview(&conn, 2).unwrap();
        assert_eq!(head.row_count(), 2);

        let seniors = filter_by_age_group(&conn, "60+", 100).unwrap();
        assert_eq!(seniors.row_count(), 1);

        assert!(filter_by_age_group(&conn, "old", 100).is_err());
    }

    #[test]
    fn test_explore_empty_database() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let exploration = explore(&conn).unwrap();
        assert_eq!(exploration.total_contacts, 0);
        assert_eq!(exploration.subscription_rate, 0.0);
        assert!(exploration.jobs.is_empty());
        assert_eq!(exploration.durations[1].contacts, 0);
    }
}
