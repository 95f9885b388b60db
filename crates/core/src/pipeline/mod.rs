pub mod error;
pub mod orchestrator;
pub mod summary;

pub use error::{RunFailure, RunPhase, UpdateError};
pub use summary::RunSummary;

use crate::config::{InstrumentCodes, Settings};
use crate::ingest::{DayFetcher, HttpGatewaySource};
use crate::layout::SheetLayout;
use crate::pipeline::orchestrator::{refresh_snapshot, run_update, UpdateDeps, UpdateOptions};
use crate::snapshot::publish::{GitPublisher, SnapshotPublisher};
use crate::snapshot::SnapshotBuilder;
use crate::storage::backup::BackupManager;
use crate::storage::gaps::ledger_path_for;
use crate::storage::lock::{lock_path_for, stale_after_from_env, try_acquire_store_lock};
use crate::storage::{SheetStore, XlsxFile};
use crate::time::cn_market;
use chrono::Utc;
use std::path::PathBuf;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub test_mode: bool,
    /// Override for "today" (YYYY-MM-DD); defaults to the CST calendar date.
    pub today: Option<String>,
    /// Regenerate and distribute the snapshot without fetching.
    pub snapshot_only: bool,
    pub distribute: bool,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Another run holds the store lock; nothing was done.
    LockHeld { lock: PathBuf },
}

/// Wires the xlsx store, the HTTP gateway, backups and the git publisher from
/// `settings` and runs one daily update.
pub async fn run_daily_update(settings: &Settings, options: &RunOptions) -> Result<RunOutcome, RunFailure> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("daily_update", %run_id);
    run(settings, options, run_id).instrument(span).await
}

async fn run(settings: &Settings, options: &RunOptions, run_id: Uuid) -> Result<RunOutcome, RunFailure> {
    let now = Utc::now();
    let config_err = |e: anyhow::Error| RunFailure::new(run_id, RunPhase::Configuring, UpdateError::Config(e));

    let today = cn_market::resolve_today(options.today.as_deref(), now).map_err(config_err)?;
    let store_path = settings.require_store_path().map_err(config_err)?.to_path_buf();

    tracing::info!(
        %today,
        store = %store_path.display(),
        test_mode = options.test_mode,
        snapshot_only = options.snapshot_only,
        "daily update starting"
    );

    // Test runs write nothing, so they neither need nor respect the lock.
    let _lock = if options.test_mode {
        None
    } else {
        match try_acquire_store_lock(&store_path, now, stale_after_from_env()) {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                return Ok(RunOutcome::LockHeld {
                    lock: lock_path_for(&store_path),
                })
            }
            Err(e) => return Err(RunFailure::new(run_id, RunPhase::Locking, UpdateError::Lock(e))),
        }
    };

    let file = XlsxFile::new(&store_path, settings.sheet_name.clone());
    let mut store = SheetStore::load(file, SheetLayout::default())
        .map_err(|e| RunFailure::new(run_id, RunPhase::Loading, e))?;

    let snapshots = SnapshotBuilder::default();
    let git = match &settings.snapshot_repo_dir {
        Some(dir) if options.distribute && !options.test_mode => Some(GitPublisher::from_env(dir)),
        _ => None,
    };
    let publisher = git.as_ref().map(|g| g as &dyn SnapshotPublisher);

    let update = UpdateOptions {
        run_id,
        test_mode: options.test_mode,
        today,
        now,
        snapshot_path: settings.resolved_snapshot_path(),
        gap_ledger_path: Some(ledger_path_for(&store_path)),
    };

    if options.snapshot_only {
        let summary = refresh_snapshot(&store, &snapshots, publisher, &update).await?;
        return Ok(RunOutcome::Completed(summary));
    }

    let source = HttpGatewaySource::from_settings(settings).map_err(config_err)?;
    let fetcher = DayFetcher::from_env(InstrumentCodes::default());
    let backups = BackupManager::new(
        settings.resolved_backup_dir().map_err(config_err)?,
        settings.backup_retention_days,
    );

    let deps = UpdateDeps {
        source: &source,
        fetcher: &fetcher,
        backups: &backups,
        snapshots: &snapshots,
        publisher,
    };
    let summary = run_update(&mut store, &deps, &update).await?;
    Ok(RunOutcome::Completed(summary))
}
