// Bank Marketing Star Schema - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod attributes;   // Semantic Layer - column registry
pub mod schema;       // Shape Layer - DDL for tables and views
pub mod db;           // Landing table, CSV ingestion, readers
pub mod star;         // Dimension/fact projection, export
pub mod integrity;    // Referential integrity checks
pub mod data_quality; // Per-record quality scoring
pub mod analysis;     // Exploration statistics
pub mod query;        // Read-only SQL interface

// Re-export commonly used types
pub use error::MarketingError;
pub use config::AppConfig;
pub use db::{
    BankRecord, BaseRow, MarketingRow, ImportSummary, RawRecord,
    load_csv, load_raw_csv, setup_database, insert_base_records,
    get_import_log, table_counts, count_rows,
    get_marketing_rows, get_all_marketing_rows, get_marketing_rows_by_age_group,
};
pub use attributes::{
    AttributeRegistry, AttributeDefinition, AttributeType, AttributeValue, ValidationRule,
};
pub use schema::{render_ddl, TableDefinition};
pub use star::{
    assign_age_group, assign_duration_length, populate_star, export_star,
    StarSummary, AGE_GROUPS, DURATION_LENGTHS,
};
pub use integrity::{check_integrity, IntegrityReport, IntegrityCheck, CheckKind};
pub use data_quality::{
    DataQualityEngine, QualityReport, ValidationResult as QualityValidationResult,
    QualityIssue, Severity, BatchSummary,
};
pub use analysis::{explore, Exploration, ColumnSummary, CategoryCount, DurationOutcome};
pub use query::{run_query, QueryResult, DEFAULT_QUERY};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
