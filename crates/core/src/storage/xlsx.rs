use crate::storage::sheet::{CellContent, Sheet};
use crate::storage::store::{StoreError, StoreFile};
use std::path::{Path, PathBuf};
use umya_spreadsheet::{Spreadsheet, Worksheet};

/// Workbook on disk holding the indicator sheet.
#[derive(Debug, Clone)]
pub struct XlsxFile {
    path: PathBuf,
    sheet_name: String,
}

impl XlsxFile {
    pub fn new(path: impl Into<PathBuf>, sheet_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sheet_name: sheet_name.into(),
        }
    }

    fn partial_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.xlsx".to_string());
        self.path.with_file_name(format!(".{name}.partial"))
    }
}

/// Whole workbook plus the name of the sheet the pipeline works on.
pub struct XlsxSheet {
    book: Spreadsheet,
    sheet_name: String,
}

impl XlsxSheet {
    fn worksheet(&self) -> Option<&Worksheet> {
        self.book.get_sheet_by_name(&self.sheet_name)
    }

    fn worksheet_mut(&mut self) -> Option<&mut Worksheet> {
        self.book.get_sheet_by_name_mut(&self.sheet_name)
    }
}

impl StoreFile for XlsxFile {
    type Sheet = XlsxSheet;

    fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<XlsxSheet, StoreError> {
        let book = umya_spreadsheet::reader::xlsx::read(&self.path).map_err(|e| StoreError::Read {
            path: self.path.clone(),
            detail: format!("{e:?}"),
        })?;

        if book.get_sheet_by_name(&self.sheet_name).is_none() {
            return Err(StoreError::SheetMissing {
                path: self.path.clone(),
                sheet: self.sheet_name.clone(),
            });
        }

        Ok(XlsxSheet {
            book,
            sheet_name: self.sheet_name.clone(),
        })
    }

    /// Writes next to the target and renames over it, so readers never see a
    /// half-written workbook.
    fn save(&self, sheet: &XlsxSheet) -> Result<(), StoreError> {
        let partial = self.partial_path();
        let write_err = |detail: String| StoreError::Write {
            path: self.path.clone(),
            detail,
        };

        umya_spreadsheet::writer::xlsx::write(&sheet.book, &partial)
            .map_err(|e| write_err(format!("{e:?}")))?;

        if let Err(e) = std::fs::rename(&partial, &self.path) {
            let _ = std::fs::remove_file(&partial);
            return Err(write_err(e.to_string()));
        }
        Ok(())
    }
}

impl Sheet for XlsxSheet {
    fn cell(&self, col: u32, row: u32) -> CellContent {
        let Some(cell) = self.worksheet().and_then(|ws| ws.get_cell((col, row))) else {
            return CellContent::Empty;
        };

        let formula = cell.get_formula();
        if !formula.is_empty() {
            return CellContent::Formula(formula.trim_start_matches('=').to_string());
        }
        if let Some(n) = cell.get_value_number() {
            return CellContent::Number(n);
        }
        let text = cell.get_value();
        if text.trim().is_empty() {
            CellContent::Empty
        } else {
            CellContent::Text(text.to_string())
        }
    }

    fn number(&self, col: u32, row: u32) -> Option<f64> {
        let cell = self.worksheet()?.get_cell((col, row))?;
        cell.get_value_number()
            .or_else(|| cell.get_value().trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    fn highest_row(&self) -> u32 {
        self.worksheet().map(|ws| ws.get_highest_row()).unwrap_or(0)
    }

    fn set_number(&mut self, col: u32, row: u32, value: f64) {
        if let Some(ws) = self.worksheet_mut() {
            ws.get_cell_mut((col, row)).set_value_number(value);
        }
    }

    fn set_formula(&mut self, col: u32, row: u32, formula: &str) {
        if let Some(ws) = self.worksheet_mut() {
            ws.get_cell_mut((col, row)).set_formula(formula);
        }
    }

    fn copy_style(&mut self, from: (u32, u32), to: (u32, u32)) {
        let Some(ws) = self.worksheet_mut() else {
            return;
        };
        let style = ws.get_cell(from).map(|c| c.get_style().clone());
        if let Some(style) = style {
            ws.get_cell_mut(to).set_style(style);
        }
    }

    fn set_number_format(&mut self, col: u32, row: u32, format_code: &str) {
        if let Some(ws) = self.worksheet_mut() {
            ws.get_cell_mut((col, row))
                .get_style_mut()
                .get_number_format_mut()
                .set_format_code(format_code);
        }
    }
}
