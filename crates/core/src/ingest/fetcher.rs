use crate::config::{parsed_env, InstrumentCodes};
use crate::domain::record::DayRecord;
use crate::ingest::source::{MarketDataSource, SourceError};
use crate::layout::Field;
use chrono::NaiveDate;

pub const DEFAULT_BREADTH_BATCH_SIZE: usize = 3000;

const BENCHMARK_FIELDS: [&str; 4] = ["close", "free_turn_n", "val_dividendyield3", "pe_ttm"];
const PRICE_ADJUSTED: &str = "PriceAdj=F";
const RSI_OPTIONS: &str = "RSI_N=20;PriceAdj=F";
const BREADTH_FIELDS: [&str; 2] = ["close", "MA"];

// Raw aggregates above this are in yuan; the store keeps units of 1e8.
const MARGIN_RAW_THRESHOLD: f64 = 1_000_000.0;
const MARGIN_UNIT: f64 = 100_000_000.0;

/// One assembled day plus the queries that degraded to null.
#[derive(Debug, Clone, PartialEq)]
pub struct DayFetch {
    pub record: DayRecord,
    pub failed_queries: Vec<String>,
}

/// Issues the fixed per-day query batch against a [`MarketDataSource`].
#[derive(Debug, Clone)]
pub struct DayFetcher {
    codes: InstrumentCodes,
    breadth_batch_size: usize,
}

impl DayFetcher {
    pub fn new(codes: InstrumentCodes, breadth_batch_size: usize) -> Self {
        Self {
            codes,
            breadth_batch_size: breadth_batch_size.max(1),
        }
    }

    pub fn from_env(codes: InstrumentCodes) -> Self {
        let batch = parsed_env::<usize>("BREADTH_BATCH_SIZE").unwrap_or(DEFAULT_BREADTH_BATCH_SIZE);
        Self::new(codes, batch)
    }

    pub fn codes(&self) -> &InstrumentCodes {
        &self.codes
    }

    /// Query failures null out their fields and are listed in
    /// [`DayFetch::failed_queries`]; only a lost connection is an error.
    pub async fn fetch_day<S: MarketDataSource + ?Sized>(
        &self,
        source: &S,
        date: NaiveDate,
    ) -> Result<DayFetch, SourceError> {
        let mut failed = Vec::new();
        let mut record = DayRecord::new(date);
        let codes = &self.codes;

        let benchmark = source
            .scalar_fields(&codes.benchmark, &BENCHMARK_FIELDS, date, PRICE_ADJUSTED)
            .await;
        if let Some(values) = soften(benchmark, &mut failed)? {
            let fields = [Field::Close, Field::Turnover, Field::DividendYield, Field::PeTtm];
            for (field, value) in fields.into_iter().zip(values) {
                record.set(field, value);
            }
        }

        // Fund indices are queried one at a time; a combined query drops the second value.
        for (code, field) in [
            (&codes.equity_fund, Field::EquityFund),
            (&codes.bond_fund, Field::BondFund),
        ] {
            let res = source.scalar_fields(code, &["close"], date, PRICE_ADJUSTED).await;
            if let Some(values) = soften(res, &mut failed)? {
                record.set(field, values.first().copied().flatten());
            }
        }

        let margin = self.fetch_margin_balance(source, date).await;
        if let Some(value) = soften(margin, &mut failed)? {
            record.set(Field::MarginBalance, value);
        }

        if let Some(counts) = soften(source.change_counts(date).await, &mut failed)? {
            record.set(Field::Advancing, counts.advancing);
            record.set(Field::Flat, counts.flat);
            record.set(Field::Declining, counts.declining);
            record.set(Field::LimitUp, counts.limit_up);
            record.set(Field::LimitDown, counts.limit_down);
        }

        let rsi = source
            .scalar_fields(&codes.benchmark, &["RSI"], date, RSI_OPTIONS)
            .await;
        if let Some(values) = soften(rsi, &mut failed)? {
            record.set(Field::Rsi20, values.first().copied().flatten());
        }

        let treasury = source.economic_value(&codes.treasury_yield, date).await;
        if let Some(value) = soften(treasury, &mut failed)? {
            record.set(Field::TreasuryYield, value);
        }

        let breadth = self.compute_breadth_ratio(source, date).await;
        if let Some(value) = soften(breadth, &mut failed)? {
            record.set(Field::BreadthMa20, value);
        }

        tracing::debug!(
            %date,
            fields = record.values.len(),
            failed_queries = failed.len(),
            "day fetched"
        );
        Ok(DayFetch {
            record,
            failed_queries: failed,
        })
    }

    /// Market-wide margin balance in units of 1e8.
    pub async fn fetch_margin_balance<S: MarketDataSource + ?Sized>(
        &self,
        source: &S,
        date: NaiveDate,
    ) -> Result<Option<f64>, SourceError> {
        Ok(source.margin_balance(date).await?.map(normalize_margin))
    }

    /// Percentage of constituents closing above their 20-day moving average,
    /// over constituents with both values present. `None` when none qualify.
    /// A failed batch is skipped; a failed constituent lookup is an error.
    pub async fn compute_breadth_ratio<S: MarketDataSource + ?Sized>(
        &self,
        source: &S,
        date: NaiveDate,
    ) -> Result<Option<f64>, SourceError> {
        let codes = source
            .constituents(&self.codes.constituent_sector, date)
            .await?;
        if codes.is_empty() {
            tracing::warn!(%date, "constituent list is empty");
            return Ok(None);
        }

        let options = format!("tradeDate={};MA_N=20;priceAdj=F;cycle=D", date.format("%Y%m%d"));
        let mut above = 0usize;
        let mut valid = 0usize;

        for (i, batch) in codes.chunks(self.breadth_batch_size).enumerate() {
            let rows = match source
                .cross_section(batch, &BREADTH_FIELDS, date, &options)
                .await
            {
                Ok(rows) => rows,
                Err(err @ SourceError::Connection(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(%date, batch = i, size = batch.len(), error = %err, "breadth batch skipped");
                    continue;
                }
            };
            for row in rows {
                if let (Some(Some(price)), Some(Some(ma))) = (row.first(), row.get(1)) {
                    valid += 1;
                    if price > ma {
                        above += 1;
                    }
                }
            }
        }

        let ratio = breadth_ratio(above, valid);
        tracing::debug!(%date, constituents = codes.len(), valid, above, ?ratio, "breadth computed");
        Ok(ratio)
    }
}

pub fn normalize_margin(raw: f64) -> f64 {
    if raw > MARGIN_RAW_THRESHOLD {
        raw / MARGIN_UNIT
    } else {
        raw
    }
}

/// `above / valid` as a percentage rounded to two decimals.
pub fn breadth_ratio(above: usize, valid: usize) -> Option<f64> {
    if valid == 0 {
        return None;
    }
    let pct = above as f64 / valid as f64 * 100.0;
    Some((pct * 100.0).round() / 100.0)
}

fn soften<T>(res: Result<T, SourceError>, failed: &mut Vec<String>) -> Result<Option<T>, SourceError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(err @ SourceError::Connection(_)) => Err(err),
        Err(SourceError::Query { query, detail }) => {
            tracing::warn!(%query, %detail, "query failed; fields left empty");
            failed.push(query);
            Ok(None)
        }
    }
}
