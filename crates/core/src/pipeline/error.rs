use crate::ingest::source::SourceError;
use crate::storage::store::StoreError;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Step of the daily update in which a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Configuring,
    Locking,
    Loading,
    Connecting,
    DeterminingGap,
    BackingUp,
    Fetching,
    Persisting,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Configuring => "configuring",
            RunPhase::Locking => "locking",
            RunPhase::Loading => "loading the store",
            RunPhase::Connecting => "connecting to the market data source",
            RunPhase::DeterminingGap => "determining missing dates",
            RunPhase::BackingUp => "backing up the store",
            RunPhase::Fetching => "fetching market data",
            RunPhase::Persisting => "persisting the store",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("store has no data rows; the first row must be seeded by hand")]
    EmptyStore,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0:#}")]
    Backup(anyhow::Error),

    #[error("{0:#}")]
    Config(anyhow::Error),

    #[error("{0:#}")]
    Lock(anyhow::Error),
}

/// Fatal outcome of a run, tagged with the phase it failed in.
#[derive(Debug, thiserror::Error)]
#[error("daily update {run_id} failed while {phase}: {error}")]
pub struct RunFailure {
    pub run_id: Uuid,
    pub phase: RunPhase,
    #[source]
    pub error: UpdateError,
}

impl RunFailure {
    pub fn new(run_id: Uuid, phase: RunPhase, error: impl Into<UpdateError>) -> Self {
        Self {
            run_id,
            phase,
            error: error.into(),
        }
    }
}
