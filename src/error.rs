// ⚠️ Domain errors
// Typed failures for the seams where callers need to branch (HTTP status, CLI hints)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketingError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for '{field}' at line {line}: {value:?}")]
    InvalidValue {
        field: String,
        line: usize,
        value: String,
    },

    #[error("missing column '{0}' in CSV header")]
    MissingColumn(String),

    #[error("query is empty")]
    EmptyQuery,

    #[error("only read-only statements are allowed")]
    ReadOnlyViolation,

    #[error("only one statement per query is allowed")]
    MultipleStatements,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown age group: {0}")]
    UnknownAgeGroup(String),
}

impl MarketingError {
    /// True when the caller supplied bad input (as opposed to a storage failure)
    pub fn is_user_error(&self) -> bool {
        match self {
            MarketingError::EmptyQuery
            | MarketingError::ReadOnlyViolation
            | MarketingError::MultipleStatements
            | MarketingError::UnknownTable(_)
            | MarketingError::UnknownAgeGroup(_)
            | MarketingError::InvalidValue { .. }
            | MarketingError::MissingColumn(_) => true,
            // SQLITE_ERROR: syntax errors, unknown columns
            MarketingError::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::Unknown
            }
            // Prepare errors carrying the offending SQL and offset
            MarketingError::Database(rusqlite::Error::SqlInputError { .. }) => true,
            MarketingError::Database(rusqlite::Error::MultipleStatement) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketingError>;
