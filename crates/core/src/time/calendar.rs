use crate::ingest::source::{MarketDataSource, SourceError};
use chrono::NaiveDate;

/// Trading days strictly after `after`, up to and including `today`, in
/// ascending order. A calendar query failure yields no days; only a lost
/// connection is an error.
pub async fn trading_days_after<S: MarketDataSource + ?Sized>(
    source: &S,
    after: NaiveDate,
    today: NaiveDate,
) -> Result<Vec<NaiveDate>, SourceError> {
    if after >= today {
        return Ok(Vec::new());
    }

    let days = match source.trading_days(after, today).await {
        Ok(days) => days,
        Err(err @ SourceError::Connection(_)) => return Err(err),
        Err(err) => {
            tracing::warn!(%after, %today, error = %err, "trading calendar unavailable; no days resolved");
            return Ok(Vec::new());
        }
    };

    let mut days: Vec<NaiveDate> = days
        .into_iter()
        .filter(|d| *d > after && *d <= today)
        .collect();
    days.sort();
    days.dedup();
    Ok(days)
}
