use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Source unreachable or session lost. Fatal to a run.
    #[error("market data source unreachable: {0}")]
    Connection(String),

    /// One query failed. The affected fields degrade to null.
    #[error("market data query `{query}` failed: {detail}")]
    Query { query: String, detail: String },
}

impl SourceError {
    pub fn query(query: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Query {
            query: query.into(),
            detail: detail.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Market-wide advance/decline/limit counts for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChangeCounts {
    pub advancing: Option<f64>,
    pub flat: Option<f64>,
    pub declining: Option<f64>,
    pub limit_up: Option<f64>,
    pub limit_down: Option<f64>,
}

/// Query surface of the external market-data terminal. One session per run:
/// `connect` before the first query, `disconnect` when done.
///
/// Dates go over the wire as `YYYY-MM-DD`. Option strings use the
/// terminal's `key=value;key=value` syntax.
#[async_trait::async_trait]
pub trait MarketDataSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn connect(&self) -> Result<(), SourceError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), SourceError>;

    /// Trading days in `[start, end]`, ascending.
    async fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, SourceError>;

    /// Several fields of one instrument on one date, aligned with `fields`.
    async fn scalar_fields(
        &self,
        code: &str,
        fields: &[&str],
        date: NaiveDate,
        options: &str,
    ) -> Result<Vec<Option<f64>>, SourceError>;

    /// Constituent codes of a sector/index as of `date`.
    async fn constituents(&self, sector_id: &str, date: NaiveDate) -> Result<Vec<String>, SourceError>;

    /// One row per code (aligned with `codes`), one column per field.
    async fn cross_section(
        &self,
        codes: &[String],
        fields: &[&str],
        date: NaiveDate,
        options: &str,
    ) -> Result<Vec<Vec<Option<f64>>>, SourceError>;

    /// Market-wide margin balance aggregate, in the unit the terminal reports.
    async fn margin_balance(&self, date: NaiveDate) -> Result<Option<f64>, SourceError>;

    async fn change_counts(&self, date: NaiveDate) -> Result<ChangeCounts, SourceError>;

    /// Macro series value with fill-previous semantics.
    async fn economic_value(&self, code: &str, date: NaiveDate) -> Result<Option<f64>, SourceError>;
}
