use crate::snapshot::publish::PublishOutcome;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DateStatus {
    Appended,
    ValidationFailed { reason: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateOutcome {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub status: DateStatus,
    /// Queries that degraded to null for this date.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_queries: Vec<String>,
    /// Margin balance was copied from the previous row.
    pub margin_carried_forward: bool,
}

impl DateOutcome {
    pub fn is_appended(&self) -> bool {
        self.status == DateStatus::Appended
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginCorrection {
    pub date: NaiveDate,
    pub previous: Option<f64>,
    pub corrected: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotStep {
    Skipped { reason: String },
    Built { data_points: usize },
    Written { path: PathBuf, data_points: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DistributionStep {
    Skipped { reason: String },
    Done { channel: String, outcome: PublishOutcome },
    Failed { channel: String, error: String },
}

/// Per-run report: every resolved date with its outcome, plus what happened
/// to the store, the snapshot and its distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub test_mode: bool,
    pub today: NaiveDate,
    pub started_at: String,
    pub last_date_before: Option<NaiveDate>,
    pub last_date_after: Option<NaiveDate>,
    pub backup: Option<PathBuf>,
    pub pruned_backups: usize,
    pub margin_correction: Option<MarginCorrection>,
    pub dates: Vec<DateOutcome>,
    pub rows_written: usize,
    /// Dates skipped in this run while a later date was appended.
    pub new_gaps: Vec<NaiveDate>,
    /// Every gap recorded in the ledger and not yet backfilled.
    pub outstanding_gaps: Vec<NaiveDate>,
    pub snapshot: SnapshotStep,
    pub distribution: DistributionStep,
}

impl RunSummary {
    pub fn new(run_id: Uuid, test_mode: bool, today: NaiveDate, started_at: String) -> Self {
        Self {
            run_id,
            test_mode,
            today,
            started_at,
            last_date_before: None,
            last_date_after: None,
            backup: None,
            pruned_backups: 0,
            margin_correction: None,
            dates: Vec::new(),
            rows_written: 0,
            new_gaps: Vec::new(),
            outstanding_gaps: Vec::new(),
            snapshot: SnapshotStep::Skipped {
                reason: "not reached".to_string(),
            },
            distribution: DistributionStep::Skipped {
                reason: "not reached".to_string(),
            },
        }
    }

    pub fn succeeded(&self) -> usize {
        self.dates.iter().filter(|d| d.is_appended()).count()
    }

    pub fn failed(&self) -> usize {
        self.dates.len() - self.succeeded()
    }

    pub fn failed_dates(&self) -> impl Iterator<Item = (&NaiveDate, &str)> {
        self.dates.iter().filter_map(|d| match &d.status {
            DateStatus::Appended => None,
            DateStatus::ValidationFailed { reason } | DateStatus::Rejected { reason } => {
                Some((&d.date, reason.as_str()))
            }
        })
    }
}
