use chrono::{Duration, NaiveDate};

/// Content of a single cell as seen by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Empty,
    Number(f64),
    Text(String),
    /// Formula text without the leading `=`.
    Formula(String),
}

/// Minimal cell-level view of one worksheet. Implemented by the xlsx adapter
/// and by the in-memory sheet used in tests.
pub trait Sheet {
    fn cell(&self, col: u32, row: u32) -> CellContent;

    /// Numeric value of a cell, including the cached result of a formula.
    fn number(&self, col: u32, row: u32) -> Option<f64>;

    fn highest_row(&self) -> u32;

    fn set_number(&mut self, col: u32, row: u32, value: f64);

    fn set_formula(&mut self, col: u32, row: u32, formula: &str);

    fn copy_style(&mut self, from: (u32, u32), to: (u32, u32));

    fn set_number_format(&mut self, col: u32, row: u32, format_code: &str);
}

fn serial_epoch() -> NaiveDate {
    // Spreadsheet serial day 0 (accounts for the 1900 leap-year bug).
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

pub fn date_to_serial(date: NaiveDate) -> f64 {
    (date - serial_epoch()).num_days() as f64
}

pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    serial_epoch().checked_add_signed(Duration::days(serial.floor() as i64))
}

/// Reads a date cell stored either as a serial number or as text.
pub fn parse_date_cell(content: &CellContent) -> Option<NaiveDate> {
    match content {
        CellContent::Number(n) => serial_to_date(*n),
        CellContent::Text(s) => {
            let t = s.trim();
            let head = t.get(..10).unwrap_or(t);
            NaiveDate::parse_from_str(head, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(head, "%Y/%m/%d"))
                .ok()
        }
        CellContent::Empty | CellContent::Formula(_) => None,
    }
}
