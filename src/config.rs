//! Application configuration. Paths, CSV dialect, server and query limits.

use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "bank_marketing.db";
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_PREVIEW_ROWS: usize = 5;
pub const DEFAULT_MAX_QUERY_ROWS: usize = 1000;
pub const DEFAULT_EXPORT_DIR: &str = "export";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    /// Raw dataset CSV. Read from BANK_MARKETING_CSV_PATH.
    #[serde(default)]
    pub csv_path: Option<String>,

    /// SQLite database file. Read from BANK_MARKETING_DB_PATH.
    #[serde(default)]
    pub db_path: Option<String>,

    /// CSV delimiter (single character); detected from the header when unset.
    #[serde(default)]
    pub delimiter: Option<String>,

    #[serde(default)]
    pub server_addr: Option<String>,

    /// Rows shown by preview commands
    #[serde(default)]
    pub preview_rows: Option<usize>,

    /// Upper bound on rows returned by the query interface
    #[serde(default)]
    pub max_query_rows: Option<usize>,

    #[serde(default)]
    pub export_dir: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("BANK_MARKETING"));
        if let Ok(path) = std::env::var("BANK_MARKETING_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(self.db_path.as_deref().unwrap_or(DEFAULT_DB_PATH))
    }

    pub fn server_addr(&self) -> String {
        self.server_addr
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string())
    }

    pub fn preview_rows(&self) -> usize {
        self.preview_rows.unwrap_or(DEFAULT_PREVIEW_ROWS)
    }

    pub fn max_query_rows(&self) -> usize {
        self.max_query_rows.unwrap_or(DEFAULT_MAX_QUERY_ROWS)
    }

    pub fn export_dir(&self) -> PathBuf {
        PathBuf::from(self.export_dir.as_deref().unwrap_or(DEFAULT_EXPORT_DIR))
    }

    /// Delimiter byte; None means "detect from header". Only single ASCII characters are accepted.
    pub fn delimiter(&self) -> Option<u8> {
        match self.delimiter.as_deref() {
            Some("\\t") | Some("tab") => Some(b'\t'),
            Some(s) if s.len() == 1 && s.is_ascii() => s.bytes().next(),
            _ => None,
        }
    }
}
