//! Scripted in-memory market-data source for unit tests.

use crate::ingest::source::{ChangeCounts, MarketDataSource, SourceError};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct FakeSource {
    pub calendar: Vec<NaiveDate>,
    pub scalars: HashMap<(String, String, NaiveDate), f64>,
    pub margins: HashMap<NaiveDate, f64>,
    pub counts: HashMap<NaiveDate, ChangeCounts>,
    pub economic: HashMap<(String, NaiveDate), f64>,
    pub constituents: HashMap<NaiveDate, Vec<String>>,
    /// (code, date) -> (close, MA)
    pub cross: HashMap<(String, NaiveDate), (Option<f64>, Option<f64>)>,
    /// Query shapes that fail with a query error: "tdays", "wsd", "wss",
    /// "constituents", "margin", "counts", "edb".
    pub failing: HashSet<&'static str>,
    /// Dates on which any query reports a lost connection.
    pub disconnect_on: HashSet<NaiveDate>,
    pub refuse_connect: bool,
    connected: AtomicBool,
    pub batches: Mutex<Vec<usize>>,
    pub disconnects: Mutex<usize>,
}

impl FakeSource {
    pub fn set_scalar(&mut self, code: &str, field: &str, date: NaiveDate, value: f64) {
        self.scalars
            .insert((code.to_string(), field.to_string(), date), value);
    }

    fn check(&self, shape: &'static str, date: NaiveDate) -> Result<(), SourceError> {
        if !self.connected.load(Ordering::SeqCst) || self.disconnect_on.contains(&date) {
            return Err(SourceError::Connection("session lost".to_string()));
        }
        if self.failing.contains(shape) {
            return Err(SourceError::query(shape, "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MarketDataSource for FakeSource {
    fn source_name(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self) -> Result<(), SourceError> {
        if self.refuse_connect {
            return Err(SourceError::Connection("refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        self.connected.store(false, Ordering::SeqCst);
        *self.disconnects.lock().unwrap() += 1;
        Ok(())
    }

    async fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, SourceError> {
        self.check("tdays", end)?;
        Ok(self
            .calendar
            .iter()
            .copied()
            .filter(|d| *d >= start && *d <= end)
            .collect())
    }

    async fn scalar_fields(
        &self,
        code: &str,
        fields: &[&str],
        date: NaiveDate,
        _options: &str,
    ) -> Result<Vec<Option<f64>>, SourceError> {
        self.check("wsd", date)?;
        Ok(fields
            .iter()
            .map(|f| {
                self.scalars
                    .get(&(code.to_string(), f.to_string(), date))
                    .copied()
            })
            .collect())
    }

    async fn constituents(&self, _sector_id: &str, date: NaiveDate) -> Result<Vec<String>, SourceError> {
        self.check("constituents", date)?;
        Ok(self.constituents.get(&date).cloned().unwrap_or_default())
    }

    async fn cross_section(
        &self,
        codes: &[String],
        fields: &[&str],
        date: NaiveDate,
        _options: &str,
    ) -> Result<Vec<Vec<Option<f64>>>, SourceError> {
        self.check("wss", date)?;
        self.batches.lock().unwrap().push(codes.len());
        Ok(codes
            .iter()
            .map(|code| {
                let (close, ma) = self
                    .cross
                    .get(&(code.clone(), date))
                    .copied()
                    .unwrap_or((None, None));
                fields
                    .iter()
                    .map(|f| match *f {
                        "close" => close,
                        "MA" => ma,
                        _ => None,
                    })
                    .collect()
            })
            .collect())
    }

    async fn margin_balance(&self, date: NaiveDate) -> Result<Option<f64>, SourceError> {
        self.check("margin", date)?;
        Ok(self.margins.get(&date).copied())
    }

    async fn change_counts(&self, date: NaiveDate) -> Result<ChangeCounts, SourceError> {
        self.check("counts", date)?;
        Ok(self.counts.get(&date).copied().unwrap_or_default())
    }

    async fn economic_value(&self, code: &str, date: NaiveDate) -> Result<Option<f64>, SourceError> {
        self.check("edb", date)?;
        Ok(self.economic.get(&(code.to_string(), date)).copied())
    }
}
