use crate::ingest::fetcher::DayFetcher;
use crate::ingest::source::{MarketDataSource, SourceError};
use crate::layout::Field;
use crate::pipeline::error::{RunFailure, RunPhase, UpdateError};
use crate::pipeline::summary::{
    DateOutcome, DateStatus, DistributionStep, MarginCorrection, RunSummary, SnapshotStep,
};
use crate::snapshot::publish::SnapshotPublisher;
use crate::snapshot::{write_snapshot, SnapshotBuilder};
use crate::storage::backup::BackupManager;
use crate::storage::gaps::{GapEntry, GapLedger};
use crate::storage::store::{SheetStore, StoreFile};
use crate::time::calendar::trading_days_after;
use crate::time::cn_market;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use uuid::Uuid;

// Stored and fetched margin balances closer than this are the same value.
const MARGIN_EPSILON: f64 = 1e-6;

/// Collaborators of one run, constructed by the caller.
pub struct UpdateDeps<'a, S: MarketDataSource + ?Sized> {
    pub source: &'a S,
    pub fetcher: &'a DayFetcher,
    pub backups: &'a BackupManager,
    pub snapshots: &'a SnapshotBuilder,
    pub publisher: Option<&'a dyn SnapshotPublisher>,
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub run_id: Uuid,
    /// Fetch and validate only: no backup, persist, snapshot write or distribution.
    pub test_mode: bool,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
    pub snapshot_path: PathBuf,
    pub gap_ledger_path: Option<PathBuf>,
}

/// Gap → backup → fetch/validate/append per date → persist → snapshot →
/// distribute. The source session is closed on every path once opened.
pub async fn run_update<F, S>(
    store: &mut SheetStore<F>,
    deps: &UpdateDeps<'_, S>,
    options: &UpdateOptions,
) -> Result<RunSummary, RunFailure>
where
    F: StoreFile,
    S: MarketDataSource + ?Sized,
{
    let run_id = options.run_id;
    let started_at = cn_market::format_cst_timestamp(options.now)
        .map_err(|e| RunFailure::new(run_id, RunPhase::Configuring, UpdateError::Config(e)))?;
    let mut summary = RunSummary::new(run_id, options.test_mode, options.today, started_at);
    summary.last_date_before = store.last_date();

    deps.source
        .connect()
        .await
        .map_err(|e| RunFailure::new(run_id, RunPhase::Connecting, e))?;

    let updated = update_store(store, deps, options, &mut summary).await;

    if let Err(err) = deps.source.disconnect().await {
        tracing::warn!(error = %err, "failed to close market data session");
    }
    updated?;

    summary.last_date_after = store.last_date();
    let (snapshot, distribution) = publish_snapshot(store, deps.snapshots, deps.publisher, options).await;
    summary.snapshot = snapshot;
    summary.distribution = distribution;

    tracing::info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        rows_written = summary.rows_written,
        last_date = ?summary.last_date_after,
        "daily update finished"
    );
    for (date, reason) in summary.failed_dates() {
        tracing::warn!(%date, %reason, "date not appended");
    }
    Ok(summary)
}

async fn update_store<F, S>(
    store: &mut SheetStore<F>,
    deps: &UpdateDeps<'_, S>,
    options: &UpdateOptions,
    summary: &mut RunSummary,
) -> Result<(), RunFailure>
where
    F: StoreFile,
    S: MarketDataSource + ?Sized,
{
    let run_id = options.run_id;
    let fail = move |phase: RunPhase| move |e: SourceError| RunFailure::new(run_id, phase, e);

    let last = store
        .last_date()
        .ok_or_else(|| RunFailure::new(run_id, RunPhase::DeterminingGap, UpdateError::EmptyStore))?;

    let days = trading_days_after(deps.source, last, options.today)
        .await
        .map_err(fail(RunPhase::DeterminingGap))?;
    tracing::info!(%last, today = %options.today, missing = days.len(), "gap determined");

    if days.is_empty() {
        tracing::info!("store is up to date");
        summary.outstanding_gaps = refresh_gap_ledger(store, options, &[]);
        return Ok(());
    }

    if !options.test_mode {
        back_up(store, deps.backups, options, summary)?;
    }

    correct_last_margin(store, deps, last, summary)
        .await
        .map_err(fail(RunPhase::Fetching))?;

    for date in days {
        let fetch = deps
            .fetcher
            .fetch_day(deps.source, date)
            .await
            .map_err(fail(RunPhase::Fetching))?;
        let mut record = fetch.record;

        let mut carried = false;
        if record.get(Field::MarginBalance).is_none() {
            if let Some(prev) = store.last_row().and_then(|r| r.get(Field::MarginBalance)) {
                record.set(Field::MarginBalance, Some(prev));
                carried = true;
                tracing::info!(%date, margin = prev, "margin balance carried forward");
            }
        }

        let status = match record.validate() {
            Err(err) => {
                tracing::warn!(%date, error = %err, "record failed validation; date skipped");
                DateStatus::ValidationFailed {
                    reason: err.to_string(),
                }
            }
            Ok(()) => match store.append(record) {
                Ok(()) => {
                    tracing::info!(%date, row = store.next_row_number() - 1, "record staged");
                    DateStatus::Appended
                }
                Err(err) => {
                    tracing::warn!(%date, error = %err, "record rejected by store");
                    DateStatus::Rejected {
                        reason: err.to_string(),
                    }
                }
            },
        };

        summary.dates.push(DateOutcome {
            date,
            status,
            failed_queries: fetch.failed_queries,
            margin_carried_forward: carried,
        });
    }

    let last_appended = summary
        .dates
        .iter()
        .filter(|d| d.is_appended())
        .map(|d| d.date)
        .max();
    let gaps: Vec<&DateOutcome> = summary
        .dates
        .iter()
        .filter(|d| !d.is_appended() && last_appended.is_some_and(|last| d.date < last))
        .collect();
    summary.new_gaps = gaps.iter().map(|d| d.date).collect();

    if options.test_mode {
        tracing::info!(staged = store.staged_len(), "test mode; store left untouched");
        return Ok(());
    }

    if store.has_pending_changes() {
        summary.rows_written = store
            .persist()
            .map_err(|e| RunFailure::new(run_id, RunPhase::Persisting, e))?;
    }

    let entries: Vec<GapEntry> = gaps
        .iter()
        .map(|d| GapEntry {
            date: d.date,
            reason: match &d.status {
                DateStatus::ValidationFailed { reason } | DateStatus::Rejected { reason } => reason.clone(),
                DateStatus::Appended => String::new(),
            },
            recorded_at: summary.started_at.clone(),
            run_id: run_id.to_string(),
        })
        .collect();
    summary.outstanding_gaps = refresh_gap_ledger(store, options, &entries);
    Ok(())
}

fn back_up<F: StoreFile>(
    store: &SheetStore<F>,
    backups: &BackupManager,
    options: &UpdateOptions,
    summary: &mut RunSummary,
) -> Result<(), RunFailure> {
    let fail = |e: anyhow::Error| RunFailure::new(options.run_id, RunPhase::BackingUp, UpdateError::Backup(e));
    let local_now = cn_market::cst_now(options.now).map_err(fail)?.naive_local();

    let path = backups.backup(store.path(), local_now).map_err(fail)?;
    summary.backup = Some(path);

    match backups.prune_backups(store.path(), local_now) {
        Ok(report) => summary.pruned_backups = report.deleted.len(),
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "backup pruning failed"),
    }
    Ok(())
}

/// Re-reads the margin balance of the store's last date; late publication
/// means the stored value may be a carried-forward placeholder.
async fn correct_last_margin<F, S>(
    store: &mut SheetStore<F>,
    deps: &UpdateDeps<'_, S>,
    last: NaiveDate,
    summary: &mut RunSummary,
) -> Result<(), SourceError>
where
    F: StoreFile,
    S: MarketDataSource + ?Sized,
{
    let fetched = match deps.fetcher.fetch_margin_balance(deps.source, last).await {
        Ok(Some(v)) => v,
        Ok(None) => return Ok(()),
        Err(err @ SourceError::Connection(_)) => return Err(err),
        Err(err) => {
            tracing::warn!(%last, error = %err, "margin re-check failed");
            return Ok(());
        }
    };

    let previous = store.last_row().and_then(|r| r.get(Field::MarginBalance));
    if previous.is_some_and(|p| (p - fetched).abs() < MARGIN_EPSILON) {
        return Ok(());
    }

    match store.stage_margin_correction(last, fetched) {
        Ok(()) => {
            tracing::info!(%last, ?previous, corrected = fetched, "late margin balance staged");
            summary.margin_correction = Some(MarginCorrection {
                date: last,
                previous,
                corrected: fetched,
            });
        }
        Err(err) => tracing::warn!(%last, error = %err, "margin correction not staged"),
    }
    Ok(())
}

/// Loads the gap ledger, drops gaps filled since, records `new` and saves.
/// Ledger trouble is logged; the returned list is whatever could be read.
fn refresh_gap_ledger<F: StoreFile>(
    store: &SheetStore<F>,
    options: &UpdateOptions,
    new: &[GapEntry],
) -> Vec<NaiveDate> {
    let Some(path) = &options.gap_ledger_path else {
        return new.iter().map(|g| g.date).collect();
    };

    let mut ledger = match GapLedger::load(path) {
        Ok(ledger) => ledger,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "gap ledger unreadable");
            GapLedger::default()
        }
    };

    let filled = ledger.forget_filled(|d| store.contains_date(d));
    let added = ledger.record(new.iter().cloned());
    if !ledger.is_empty() {
        tracing::warn!(gaps = ?ledger.dates(), "store has unfilled trading-day gaps");
    }

    if !options.test_mode && (added > 0 || !filled.is_empty() || !new.is_empty()) {
        if let Err(err) = ledger.save(path) {
            tracing::warn!(error = %format!("{err:#}"), "failed to save gap ledger");
        }
    }
    ledger.dates()
}

/// Snapshot regeneration and distribution without touching the source or the store.
pub async fn refresh_snapshot<F: StoreFile>(
    store: &SheetStore<F>,
    snapshots: &SnapshotBuilder,
    publisher: Option<&dyn SnapshotPublisher>,
    options: &UpdateOptions,
) -> Result<RunSummary, RunFailure> {
    let started_at = cn_market::format_cst_timestamp(options.now).map_err(|e| {
        RunFailure::new(options.run_id, RunPhase::Configuring, UpdateError::Config(e))
    })?;
    let mut summary = RunSummary::new(options.run_id, options.test_mode, options.today, started_at);
    summary.last_date_before = store.last_date();
    summary.last_date_after = store.last_date();

    let (snapshot, distribution) = publish_snapshot(store, snapshots, publisher, options).await;
    summary.snapshot = snapshot;
    summary.distribution = distribution;
    Ok(summary)
}

/// Rebuilds the snapshot from the store and hands it to the distribution
/// channel. Failures are reported in the returned steps, never raised.
async fn publish_snapshot<F: StoreFile>(
    store: &SheetStore<F>,
    snapshots: &SnapshotBuilder,
    publisher: Option<&dyn SnapshotPublisher>,
    options: &UpdateOptions,
) -> (SnapshotStep, DistributionStep) {
    let generated_at = match cn_market::format_cst_timestamp(options.now) {
        Ok(ts) => ts,
        Err(err) => {
            let step = SnapshotStep::Failed {
                error: format!("{err:#}"),
            };
            return (step, skipped("no snapshot"));
        }
    };

    let snapshot = match snapshots.build(store, options.today, &generated_at) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::error!(error = %err, "snapshot generation failed");
            let step = SnapshotStep::Failed {
                error: err.to_string(),
            };
            return (step, skipped("no snapshot"));
        }
    };
    let data_points: usize = snapshot
        .groups
        .values()
        .flat_map(|g| g.values())
        .map(|i| i.data_points.len())
        .sum();

    if options.test_mode {
        tracing::info!(data_points, "test mode; snapshot built but not written");
        return (SnapshotStep::Built { data_points }, skipped("test mode"));
    }

    if let Err(err) = write_snapshot(&snapshot, &options.snapshot_path) {
        tracing::error!(error = %format!("{err:#}"), "snapshot write failed");
        let step = SnapshotStep::Failed {
            error: format!("{err:#}"),
        };
        return (step, skipped("no snapshot"));
    }
    let snapshot_step = SnapshotStep::Written {
        path: options.snapshot_path.clone(),
        data_points,
    };

    let Some(publisher) = publisher else {
        return (snapshot_step, skipped("no distribution channel configured"));
    };

    let channel = publisher.channel_name().to_string();
    let distribution = match publisher.publish(&options.snapshot_path, &generated_at).await {
        Ok(outcome) => DistributionStep::Done { channel, outcome },
        Err(err) => {
            tracing::warn!(channel = %channel, error = %format!("{err:#}"), "snapshot distribution failed");
            DistributionStep::Failed {
                channel,
                error: format!("{err:#}"),
            }
        }
    };
    (snapshot_step, distribution)
}

fn skipped(reason: &str) -> DistributionStep {
    DistributionStep::Skipped {
        reason: reason.to_string(),
    }
}
