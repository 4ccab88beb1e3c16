// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bank_marketing::{
    analysis, check_integrity, export_star, get_import_log, insert_base_records, load_csv,
    load_raw_csv, populate_star, query, render_ddl, setup_database, table_counts, AppConfig,
    DataQualityEngine,
};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Parser)]
#[command(name = "bank-marketing")]
#[command(about = "Star schema over the bank marketing dataset.", version)]
struct CommandLine {
    /// SQLite database (overrides BANK_MARKETING_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema DDL
    Ddl,
    /// Load a CSV into the landing table
    Import { csv: Option<PathBuf> },
    /// Project landed rows into the dimension and fact tables
    Build,
    /// Run referential integrity checks
    Validate,
    /// Score a CSV against the column rules without importing it
    Quality { csv: Option<PathBuf> },
    /// Table counts, import history and exploration statistics
    Stats,
    /// Run a read-only SQL query (the `data` view joins everything)
    #[command(alias = "q")]
    Query {
        sql: Option<String>,
        /// Write the result to this CSV file instead of printing it
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Write every table to CSV
    Export { dir: Option<PathBuf> },
    /// Interactive terminal browser
    Ui,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = CommandLine::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());

    match cli.command {
        Commands::Ddl => print!("{}", render_ddl()),
        Commands::Import { csv } => run_import(&config, &db_path, csv)?,
        Commands::Build => run_build(&db_path)?,
        Commands::Validate => run_validate(&db_path)?,
        Commands::Quality { csv } => run_quality(&config, csv)?,
        Commands::Stats => run_stats(&config, &db_path)?,
        Commands::Query { sql, csv } => run_sql(&config, &db_path, sql, csv)?,
        Commands::Export { dir } => {
            let dir = dir.unwrap_or_else(|| config.export_dir());
            run_export(&db_path, &dir)?
        }
        Commands::Ui => run_ui_mode(&db_path)?,
    }

    Ok(())
}

fn open_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn open_existing(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        eprintln!("❌ Database not found: {}", db_path.display());
        eprintln!("   Run: bank-marketing import <csv>");
        eprintln!("   to load the dataset first.");
        std::process::exit(1);
    }
    open_database(db_path)
}

fn csv_argument(config: &AppConfig, csv: Option<PathBuf>) -> Result<PathBuf> {
    csv.or_else(|| config.csv_path.as_ref().map(PathBuf::from))
        .context("No CSV given (pass a path or set BANK_MARKETING_CSV_PATH)")
}

fn run_import(config: &AppConfig, db_path: &Path, csv: Option<PathBuf>) -> Result<()> {
    let csv_path = csv_argument(config, csv)?;

    println!("🗄️  Data Import - CSV → bank_base");
    println!("{}", RULE);

    // 1. Load CSV
    println!("\n📂 Loading {}...", csv_path.display());
    let records = load_csv(&csv_path, config.delimiter())?;
    println!("✓ Loaded {} records from CSV", records.len());

    // 2. Setup database
    println!("\n🔧 Setting up database...");
    let conn = open_database(db_path)?;
    println!("✓ Database initialized with WAL mode");

    // 3. Insert records
    println!("\n💾 Inserting records...");
    let summary = insert_base_records(&conn, &records)?;
    println!("✓ Inserted {} new records", summary.rows_inserted);
    if summary.rows_skipped > 0 {
        println!("✓ Skipped {} already imported", summary.rows_skipped);
    }

    println!("\n{}", RULE);
    println!("✅ Import {} complete", summary.batch_id);
    println!("   Next: bank-marketing build");

    Ok(())
}

fn run_build(db_path: &Path) -> Result<()> {
    println!("⭐ Star Schema Build");
    println!("{}", RULE);

    let conn = open_existing(db_path)?;
    let summary = populate_star(&conn)?;

    println!("\n✓ Projected {} new facts", summary.facts_projected);
    println!("✓ marketing now holds {} facts", summary.total_facts);

    let report = check_integrity(&conn)?;
    println!("\n{}", RULE);
    if report.passed() {
        println!("🎉 {}", report.summary());
    } else {
        println!("⚠️  {}", report.summary());
        println!("   Run: bank-marketing validate");
    }

    Ok(())
}

fn run_validate(db_path: &Path) -> Result<()> {
    println!("🔗 Referential Integrity");
    println!("{}", RULE);

    let conn = open_existing(db_path)?;
    let report = check_integrity(&conn)?;

    for check in &report.checks {
        let mark = if check.passed() { "✅" } else { "❌" };
        println!("{} [{:?}] {}", mark, check.kind, check.description);
        if !check.passed() {
            println!("     {} violations, e.g. fact ids {:?}", check.violations, check.sample_ids);
        }
    }

    println!("\n{}", RULE);
    println!("{}", report.summary());

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_quality(config: &AppConfig, csv: Option<PathBuf>) -> Result<()> {
    let csv_path = csv_argument(config, csv)?;

    println!("🔬 Data Quality - {}", csv_path.display());
    println!("{}", RULE);

    // Malformed cells become issues instead of aborting the run
    let records = load_raw_csv(&csv_path, config.delimiter())?;
    let engine = DataQualityEngine::new();
    let reports = engine.validate_raw_batch(&records);
    let summary = engine.batch_summary(&reports);

    println!("\n📊 Records:        {}", summary.total_records);
    println!("✓ Clean:           {}", summary.clean_count);
    println!("⚠️  Needs review:   {}", summary.needs_review_count);
    println!("❌ Critical:       {}", summary.critical_issues_count);
    println!("   Avg quality:    {:.1}%", summary.average_quality * 100.0);

    if !summary.issues_by_field.is_empty() {
        println!("\nIssues by field:");
        for (field, count) in &summary.issues_by_field {
            println!("   {:<16} {}", field, count);
        }
    }

    let flagged: Vec<_> = reports.iter().filter(|r| r.needs_review).take(10).collect();
    if !flagged.is_empty() {
        println!("\nFirst records needing review:");
        for report in flagged {
            println!("   {}", report.summary());
            for issue in &report.issues {
                println!("      {:?} {}: {}", issue.severity, issue.field, issue.issue);
            }
        }
    }

    Ok(())
}

fn run_stats(config: &AppConfig, db_path: &Path) -> Result<()> {
    let conn = open_existing(db_path)?;

    println!("📦 Tables");
    println!("{}", RULE);
    let mut counts: Vec<_> = table_counts(&conn)?.into_iter().collect();
    counts.sort();
    for (table, count) in counts {
        println!("   {:<12} {:>8}", table, count);
    }

    let imports = get_import_log(&conn)?;
    if !imports.is_empty() {
        println!("\n🗂️  Imports");
        println!("{}", RULE);
        for import in imports {
            println!(
                "   {} {} read={} inserted={} skipped={}",
                import.finished_at.format("%Y-%m-%d %H:%M:%S"),
                import.source_file,
                import.rows_read,
                import.rows_inserted,
                import.rows_skipped
            );
        }
    }

    println!("\n👀 Preview");
    println!("{}", RULE);
    let head = analysis::preview(&conn, config.preview_rows())?;
    println!("{}", head.render_table(14));

    let exploration = analysis::explore(&conn)?;

    println!("\n📈 Summary statistics");
    println!("{}", RULE);
    println!(
        "   {:<11} {:>7} {:>10} {:>10} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
    );
    for s in &exploration.summary {
        println!(
            "   {:<11} {:>7} {:>10} {:>10} {:>8} {:>8} {:>8} {:>8} {:>8}",
            s.column,
            s.count,
            fmt_stat(s.mean),
            fmt_stat(s.std),
            fmt_stat(s.min),
            fmt_stat(s.q25),
            fmt_stat(s.median),
            fmt_stat(s.q75),
            fmt_stat(s.max)
        );
    }

    println!("\n👥 Age groups");
    println!("{}", RULE);
    for group in &exploration.age_groups {
        println!("   {:<8} {:>8}", group.label, group.count);
    }

    println!("\n💰 Subscriptions ({:.1}% subscribed)", exploration.subscription_rate * 100.0);
    println!("{}", RULE);
    for outcome in &exploration.subscriptions {
        println!("   {:<15} {:>8}", outcome.label, outcome.count);
    }

    println!("\n⏱️  Contact duration vs outcome");
    println!("{}", RULE);
    for d in &exploration.durations {
        println!(
            "   {:<7} contacts={:<7} subscribed={:<7} rate={:>5.1}% median={}s",
            d.duration_length,
            d.contacts,
            d.subscribed,
            d.subscription_rate * 100.0,
            fmt_stat(d.median_duration)
        );
    }

    println!("\n💼 Subscriptions by job");
    println!("{}", RULE);
    for job in &exploration.jobs {
        println!(
            "   {:<14} yes={:<6} no={:<6} rate={:>5.1}%",
            job.job,
            job.subscribed,
            job.not_subscribed,
            job.subscription_rate * 100.0
        );
    }

    Ok(())
}

fn fmt_stat(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

fn run_sql(config: &AppConfig, db_path: &Path, sql: Option<String>, csv: Option<PathBuf>) -> Result<()> {
    let conn = open_existing(db_path)?;
    let sql = sql.unwrap_or_else(|| query::DEFAULT_QUERY.to_string());

    let result = match query::run_query(&conn, &sql, config.max_query_rows()) {
        Ok(result) => result,
        Err(e) if e.is_user_error() => {
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    match csv {
        Some(path) => {
            std::fs::write(&path, result.to_csv()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Wrote {} rows to {}", result.row_count(), path.display());
        }
        None => {
            println!("{}", result.render_table(20));
            println!("\n({} rows)", result.row_count());
        }
    }
    if result.truncated {
        println!("⚠️  Result truncated to {} rows", config.max_query_rows());
    }

    Ok(())
}

fn run_export(db_path: &Path, dir: &Path) -> Result<()> {
    println!("📤 Export - one CSV per table");
    println!("{}", RULE);

    let conn = open_existing(db_path)?;
    for (path, rows) in export_star(&conn, dir)? {
        println!("✓ {} ({} rows)", path.display(), rows);
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(db_path: &Path) -> Result<()> {
    println!("🖥️  Loading Bank Marketing browser...\n");

    let conn = open_existing(db_path)?;

    println!("📊 Loading facts...");
    let mut app = ui::App::load(&conn)?;
    println!("✓ Loaded {} facts\n", app.rows.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_db_path: &Path) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the HTTP API: cargo run --bin marketing-server --features server");
    std::process::exit(1);
}
