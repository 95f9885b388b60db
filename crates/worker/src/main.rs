use clap::Parser;
use anyhow::Context;
use sentiboard_core::pipeline::summary::{DistributionStep, SnapshotStep};
use sentiboard_core::pipeline::{RunOptions, RunOutcome, RunSummary};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "sentiboard_worker")]
struct Args {
    /// Fetch and validate only; nothing is backed up, written or distributed.
    #[arg(long)]
    test: bool,

    /// Treat this date (YYYY-MM-DD) as today. Defaults to today's CST date.
    #[arg(long)]
    today: Option<String>,

    /// Regenerate and distribute the snapshot from the store without fetching.
    #[arg(long)]
    snapshot_only: bool,

    /// Write the snapshot but skip git distribution.
    #[arg(long)]
    no_distribute: bool,

    /// Print the run summary as JSON instead of text.
    #[arg(long)]
    json_summary: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sentiboard_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let options = RunOptions {
        test_mode: args.test,
        today: args.today,
        snapshot_only: args.snapshot_only,
        distribute: !args.no_distribute,
    };

    match sentiboard_core::pipeline::run_daily_update(&settings, &options).await {
        Ok(RunOutcome::LockHeld { lock }) => {
            tracing::warn!(lock = %lock.display(), "store lock not acquired; another run in progress");
            Ok(())
        }
        Ok(RunOutcome::Completed(summary)) => {
            if args.json_summary {
                let json = serde_json::to_string_pretty(&summary).context("serialize run summary failed")?;
                println!("{json}");
            } else {
                print_summary(&summary);
            }
            Ok(())
        }
        Err(failure) => {
            let err = anyhow::Error::new(failure);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %format!("{err:#}"), "daily update failed");
            Err(err)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    let mode = if summary.test_mode { " (test mode)" } else { "" };
    println!("run {}{mode} at {}", summary.run_id, summary.started_at);
    println!(
        "dates: {} resolved, {} appended, {} failed, {} rows written",
        summary.dates.len(),
        summary.succeeded(),
        summary.failed(),
        summary.rows_written
    );
    for (date, reason) in summary.failed_dates() {
        println!("  {date}: {reason}");
    }
    if let Some(c) = &summary.margin_correction {
        let previous = c.previous.map_or_else(|| "empty".to_string(), |v| format!("{v:.2}"));
        println!("margin balance for {} corrected: {previous} -> {:.2}", c.date, c.corrected);
    }
    match summary.last_date_after {
        Some(date) => println!("last date in store: {date}"),
        None => println!("last date in store: none"),
    }
    if !summary.outstanding_gaps.is_empty() {
        let gaps: Vec<String> = summary.outstanding_gaps.iter().map(|d| d.to_string()).collect();
        println!("unfilled gaps: {}", gaps.join(", "));
    }
    match &summary.snapshot {
        SnapshotStep::Written { path, data_points } => {
            println!("snapshot: {data_points} data points written to {}", path.display())
        }
        SnapshotStep::Built { data_points } => println!("snapshot: {data_points} data points (not written)"),
        SnapshotStep::Skipped { reason } => println!("snapshot: skipped ({reason})"),
        SnapshotStep::Failed { error } => println!("snapshot: failed: {error}"),
    }
    match &summary.distribution {
        DistributionStep::Done { channel, outcome } => println!("distribution via {channel}: {outcome:?}"),
        DistributionStep::Skipped { reason } => println!("distribution: skipped ({reason})"),
        DistributionStep::Failed { channel, error } => println!("distribution via {channel} failed: {error}"),
    }
}

fn init_sentry(settings: &sentiboard_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
