pub mod domain;
pub mod ingest;
pub mod layout;
pub mod pipeline;
pub mod snapshot;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;
    use std::path::{Path, PathBuf};

    const DEFAULT_SHEET: &str = "A";
    const DEFAULT_BACKUP_RETENTION_DAYS: i64 = 7;
    const DEFAULT_SNAPSHOT_PATH: &str = "public/static_data.json";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub store_path: Option<PathBuf>,
        pub sheet_name: String,
        pub backup_dir: Option<PathBuf>,
        pub backup_retention_days: i64,
        pub market_data_base_url: Option<String>,
        pub market_data_api_key: Option<String>,
        pub snapshot_path: PathBuf,
        pub snapshot_repo_dir: Option<PathBuf>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let backup_retention_days = match std::env::var("BACKUP_RETENTION_DAYS") {
                Ok(s) => s
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("BACKUP_RETENTION_DAYS is not an integer: {s}"))?,
                Err(_) => DEFAULT_BACKUP_RETENTION_DAYS,
            };
            anyhow::ensure!(
                backup_retention_days >= 1,
                "BACKUP_RETENTION_DAYS must be >= 1 (got {backup_retention_days})"
            );

            Ok(Self {
                store_path: non_empty_env("STORE_PATH").map(PathBuf::from),
                sheet_name: non_empty_env("STORE_SHEET").unwrap_or_else(|| DEFAULT_SHEET.to_string()),
                backup_dir: non_empty_env("BACKUP_DIR").map(PathBuf::from),
                backup_retention_days,
                market_data_base_url: non_empty_env("MARKET_DATA_BASE_URL"),
                market_data_api_key: non_empty_env("MARKET_DATA_API_KEY"),
                snapshot_path: non_empty_env("SNAPSHOT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
                snapshot_repo_dir: non_empty_env("SNAPSHOT_REPO_DIR").map(PathBuf::from),
                sentry_dsn: non_empty_env("SENTRY_DSN"),
            })
        }

        pub fn require_store_path(&self) -> anyhow::Result<&Path> {
            self.store_path
                .as_deref()
                .context("STORE_PATH is required")
        }

        pub fn require_market_data_base_url(&self) -> anyhow::Result<&str> {
            self.market_data_base_url
                .as_deref()
                .context("MARKET_DATA_BASE_URL is required")
        }

        /// A relative snapshot path is taken inside `SNAPSHOT_REPO_DIR` when one
        /// is set, so the written file is the one git publishes.
        pub fn resolved_snapshot_path(&self) -> PathBuf {
            match &self.snapshot_repo_dir {
                Some(repo) if self.snapshot_path.is_relative() => repo.join(&self.snapshot_path),
                _ => self.snapshot_path.clone(),
            }
        }

        /// Backups default to a `backups/` directory next to the store.
        pub fn resolved_backup_dir(&self) -> anyhow::Result<PathBuf> {
            if let Some(dir) = &self.backup_dir {
                return Ok(dir.clone());
            }
            let store = self.require_store_path()?;
            let parent = store.parent().unwrap_or_else(|| Path::new("."));
            Ok(parent.join("backups"))
        }
    }

    /// Instrument and sector codes queried for each trading day.
    #[derive(Debug, Clone)]
    pub struct InstrumentCodes {
        pub benchmark: String,
        pub equity_fund: String,
        pub bond_fund: String,
        pub constituent_sector: String,
        pub treasury_yield: String,
    }

    impl Default for InstrumentCodes {
        fn default() -> Self {
            Self {
                benchmark: "881001.WI".to_string(),
                equity_fund: "885001.WI".to_string(),
                bond_fund: "885003.WI".to_string(),
                constituent_sector: "a001010100000000".to_string(),
                treasury_yield: "M1004271".to_string(),
            }
        }
    }

    pub(crate) fn non_empty_env(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub(crate) fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
        non_empty_env(key).and_then(|s| s.parse::<T>().ok())
    }

}
