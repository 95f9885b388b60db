use crate::domain::record::DayRecord;
use crate::layout::{
    Field, SequenceAnchor, SheetLayout, DATE_COLUMN, FIRST_DATA_ROW, INPUT_LAST_COLUMN,
    MA20_NUMBER_FORMAT,
};
use crate::storage::formula::{propagate_row, FormulaError};
use crate::storage::sheet::{date_to_serial, parse_date_cell, CellContent, Sheet};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

const DATE_NUMBER_FORMAT: &str = "yyyy-mm-dd";

// Late margin corrections only ever target recent rows.
const CORRECTION_SEARCH_ROWS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read store {path}: {detail}")]
    Read { path: PathBuf, detail: String },

    #[error("sheet `{sheet}` not found in {path}")]
    SheetMissing { path: PathBuf, sheet: String },

    #[error("malformed date in row {row}: {value:?}")]
    MalformedDate { row: u32, value: CellContent },

    #[error("dates must be strictly increasing: {date} is not after {last}")]
    OutOfOrder { date: NaiveDate, last: NaiveDate },

    #[error("store holds {on_disk} data rows but {expected} were loaded; refusing to write")]
    Diverged { on_disk: usize, expected: usize },

    #[error("no row dated {date} to correct")]
    UnknownDate { date: NaiveDate },

    #[error("formula propagation failed: {0}")]
    Formula(#[from] FormulaError),

    #[error("failed to write store {path}: {detail}")]
    Write { path: PathBuf, detail: String },
}

/// Backing resource of a [`SheetStore`]: opens a fresh copy of the sheet and
/// writes a modified copy back as one unit.
pub trait StoreFile {
    type Sheet: Sheet;

    fn path(&self) -> &Path;

    fn open(&self) -> Result<Self::Sheet, StoreError>;

    fn save(&self, sheet: &Self::Sheet) -> Result<(), StoreError>;
}

/// One row of configured columns, as read for snapshot generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub row: u32,
    pub date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// Accessor for the row-oriented indicator sheet.
///
/// Loaded rows and staged rows live in memory; only [`SheetStore::persist`]
/// touches the backing file.
pub struct SheetStore<F: StoreFile> {
    file: F,
    layout: SheetLayout,
    rows: Vec<DayRecord>,
    staged: Vec<DayRecord>,
    corrections: Vec<(NaiveDate, f64)>,
}

impl<F: StoreFile> SheetStore<F> {
    /// Reads the input zone (A..Q) of every data row. Derived formulas are not parsed.
    pub fn load(file: F, layout: SheetLayout) -> Result<Self, StoreError> {
        let sheet = file.open()?;
        let count = data_row_count(&sheet);

        let mut rows = Vec::with_capacity(count as usize);
        for row in FIRST_DATA_ROW..FIRST_DATA_ROW + count {
            let content = sheet.cell(DATE_COLUMN, row);
            let date = parse_date_cell(&content)
                .ok_or(StoreError::MalformedDate { row, value: content })?;

            let mut record = DayRecord::new(date);
            for field in Field::ALL {
                record.set(field, sheet.number(field.column(), row));
            }
            rows.push(record);
        }

        if let Some(pos) = rows.windows(2).position(|w| w[1].date <= w[0].date) {
            tracing::warn!(
                row = FIRST_DATA_ROW + pos as u32 + 1,
                date = %rows[pos + 1].date,
                "store dates are not strictly increasing"
            );
        }

        tracing::debug!(path = %file.path().display(), rows = rows.len(), "store loaded");
        Ok(Self {
            file,
            layout,
            rows,
            staged: Vec::new(),
            corrections: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    /// Rows loaded or persisted plus rows staged in this run.
    pub fn len(&self) -> usize {
        self.rows.len() + self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Staged rows or margin corrections not yet written.
    pub fn has_pending_changes(&self) -> bool {
        !self.staged.is_empty() || !self.corrections.is_empty()
    }

    pub fn last_row(&self) -> Option<&DayRecord> {
        self.staged.last().or_else(|| self.rows.last())
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.last_row().map(|r| r.date)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.rows.iter().chain(&self.staged).any(|r| r.date == date)
    }

    /// Sheet row number the next appended record will occupy.
    pub fn next_row_number(&self) -> u32 {
        FIRST_DATA_ROW + self.len() as u32
    }

    /// Stages one record in memory. Dates must be strictly increasing.
    pub fn append(&mut self, record: DayRecord) -> Result<(), StoreError> {
        if let Some(last) = self.last_date() {
            if record.date <= last {
                return Err(StoreError::OutOfOrder {
                    date: record.date,
                    last,
                });
            }
        }
        self.staged.push(record);
        Ok(())
    }

    /// Replaces the margin balance of an existing row, in memory now and on
    /// disk at the next persist.
    pub fn stage_margin_correction(&mut self, date: NaiveDate, value: f64) -> Result<(), StoreError> {
        if let Some(rec) = self.staged.iter_mut().find(|r| r.date == date) {
            rec.set(Field::MarginBalance, Some(value));
            return Ok(());
        }
        let rec = self
            .rows
            .iter_mut()
            .find(|r| r.date == date)
            .ok_or(StoreError::UnknownDate { date })?;
        rec.set(Field::MarginBalance, Some(value));
        self.corrections.retain(|(d, _)| *d != date);
        self.corrections.push((date, value));
        Ok(())
    }

    /// Writes staged rows (with propagated formulas) and pending corrections
    /// to the backing file. Returns the number of newly written rows; a
    /// second call with nothing new staged writes nothing and returns 0.
    pub fn persist(&mut self) -> Result<usize, StoreError> {
        if self.staged.is_empty() && self.corrections.is_empty() {
            return Ok(0);
        }

        let mut sheet = self.file.open()?;
        let on_disk = data_row_count(&sheet) as usize;
        let expected = self.len();
        let new_rows = expected.saturating_sub(on_disk);

        if new_rows > self.staged.len() {
            return Err(StoreError::Diverged {
                on_disk,
                expected: self.rows.len(),
            });
        }
        let skipped = &self.staged[..self.staged.len() - new_rows];
        let first_skipped = FIRST_DATA_ROW + self.rows.len() as u32;
        for row in misaligned_rows(&sheet, first_skipped, skipped) {
            tracing::warn!(row, "row already on disk carries a different date than the staged one; keeping disk");
        }

        if new_rows == 0 && self.corrections.is_empty() {
            tracing::info!("staged rows already present in store; nothing to write");
            self.rows.append(&mut self.staged);
            return Ok(0);
        }

        for (date, value) in &self.corrections {
            let row = find_row_by_date(&sheet, on_disk as u32, *date)
                .ok_or(StoreError::UnknownDate { date: *date })?;
            sheet.set_number(Field::MarginBalance.column(), row, *value);
            tracing::info!(%date, row, margin = value, "margin balance corrected");
        }

        let pending = &self.staged[self.staged.len() - new_rows..];
        for (i, record) in pending.iter().enumerate() {
            let row = FIRST_DATA_ROW + on_disk as u32 + i as u32;
            write_input_row(&mut sheet, row, record);
            if let Some(anchor) = self.layout.sequence {
                write_sequence(&mut sheet, row, anchor);
            }
            if row > FIRST_DATA_ROW {
                let report = propagate_row(
                    &mut sheet,
                    row - 1,
                    row,
                    self.layout.derived_first_column..=self.layout.derived_last_column,
                )?;
                tracing::debug!(
                    row,
                    date = %record.date,
                    copied = report.copied,
                    failed = report.failed.len(),
                    "derived formulas propagated"
                );
            }
        }

        self.file.save(&sheet)?;

        self.rows.append(&mut self.staged);
        self.corrections.clear();
        tracing::info!(path = %self.file.path().display(), new_rows, "store persisted");
        Ok(new_rows)
    }

    /// Reads the given columns for every data row from `first_row` on, straight
    /// from the backing file (formula cells yield their cached results).
    pub fn read_series(&self, columns: &[u32], first_row: u32) -> Result<Vec<SeriesRow>, StoreError> {
        let sheet = self.file.open()?;
        let end = FIRST_DATA_ROW + data_row_count(&sheet);
        let start = first_row.max(FIRST_DATA_ROW);

        let mut out = Vec::with_capacity(end.saturating_sub(start) as usize);
        for row in start..end {
            let Some(date) = parse_date_cell(&sheet.cell(DATE_COLUMN, row)) else {
                continue;
            };
            let values = columns.iter().map(|c| sheet.number(*c, row)).collect();
            out.push(SeriesRow { row, date, values });
        }
        Ok(out)
    }
}

/// Number of consecutive data rows below the header with a non-empty date.
fn data_row_count<S: Sheet + ?Sized>(sheet: &S) -> u32 {
    let highest = sheet.highest_row();
    let mut row = FIRST_DATA_ROW;
    while row <= highest && sheet.cell(DATE_COLUMN, row) != CellContent::Empty {
        row += 1;
    }
    row - FIRST_DATA_ROW
}

/// Rows from `first_row` on whose date cell does not match the record laid
/// over it.
fn misaligned_rows<S: Sheet + ?Sized>(sheet: &S, first_row: u32, records: &[DayRecord]) -> Vec<u32> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| (first_row + i as u32, record.date))
        .filter(|(row, date)| parse_date_cell(&sheet.cell(DATE_COLUMN, *row)) != Some(*date))
        .map(|(row, _)| row)
        .collect()
}

fn find_row_by_date<S: Sheet + ?Sized>(sheet: &S, data_rows: u32, date: NaiveDate) -> Option<u32> {
    let last = FIRST_DATA_ROW + data_rows;
    let first = last.saturating_sub(CORRECTION_SEARCH_ROWS).max(FIRST_DATA_ROW);
    (first..last)
        .rev()
        .find(|row| parse_date_cell(&sheet.cell(DATE_COLUMN, *row)) == Some(date))
}

fn write_input_row<S: Sheet + ?Sized>(sheet: &mut S, row: u32, record: &DayRecord) {
    if row > FIRST_DATA_ROW {
        for col in DATE_COLUMN..=INPUT_LAST_COLUMN {
            sheet.copy_style((col, row - 1), (col, row));
        }
    } else {
        sheet.set_number_format(DATE_COLUMN, row, DATE_NUMBER_FORMAT);
    }

    sheet.set_number(DATE_COLUMN, row, date_to_serial(record.date));
    for (field, value) in &record.values {
        sheet.set_number(field.column(), row, *value);
    }
    if record.get(Field::BreadthMa20).is_some() {
        sheet.set_number_format(Field::BreadthMa20.column(), row, MA20_NUMBER_FORMAT);
    }
}

/// Anchor row gets the seed; later rows continue from the row above, falling
/// back to seed + offset when the row above is blank.
fn write_sequence<S: Sheet + ?Sized>(sheet: &mut S, row: u32, anchor: SequenceAnchor) {
    let Some(seeded) = anchor.seeded_value(row) else {
        return;
    };

    let value = if row == anchor.row {
        seeded
    } else {
        match sheet.number(anchor.column, row - 1) {
            Some(prev) => {
                let next = prev.round() as i64 + 1;
                if next != seeded {
                    tracing::warn!(row, next, seeded, "sequence column disagrees with its anchor");
                }
                next
            }
            None => seeded,
        }
    };
    sheet.set_number(anchor.column, row, value as f64);
}
