//! In-memory sheet and store file used by unit tests.

use crate::storage::sheet::{CellContent, Sheet};
use crate::storage::store::{StoreError, StoreFile};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    cells: HashMap<(u32, u32), CellContent>,
    styles: HashMap<(u32, u32), String>,
    formats: HashMap<(u32, u32), String>,
}

impl MemorySheet {
    pub fn put(&mut self, col: u32, row: u32, content: CellContent) {
        if content == CellContent::Empty {
            self.cells.remove(&(col, row));
        } else {
            self.cells.insert((col, row), content);
        }
    }

    pub fn put_style(&mut self, col: u32, row: u32, style: &str) {
        self.styles.insert((col, row), style.to_string());
    }

    pub fn style(&self, col: u32, row: u32) -> Option<&str> {
        self.styles.get(&(col, row)).map(String::as_str)
    }

    pub fn number_format(&self, col: u32, row: u32) -> Option<&str> {
        self.formats.get(&(col, row)).map(String::as_str)
    }
}

impl Sheet for MemorySheet {
    fn cell(&self, col: u32, row: u32) -> CellContent {
        self.cells
            .get(&(col, row))
            .cloned()
            .unwrap_or(CellContent::Empty)
    }

    fn number(&self, col: u32, row: u32) -> Option<f64> {
        match self.cells.get(&(col, row)) {
            Some(CellContent::Number(n)) => Some(*n),
            Some(CellContent::Text(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn highest_row(&self) -> u32 {
        self.cells.keys().map(|(_, row)| *row).max().unwrap_or(0)
    }

    fn set_number(&mut self, col: u32, row: u32, value: f64) {
        self.put(col, row, CellContent::Number(value));
    }

    fn set_formula(&mut self, col: u32, row: u32, formula: &str) {
        self.put(col, row, CellContent::Formula(formula.to_string()));
    }

    fn copy_style(&mut self, from: (u32, u32), to: (u32, u32)) {
        match self.styles.get(&from).cloned() {
            Some(style) => {
                self.styles.insert(to, style);
            }
            None => {
                self.styles.remove(&to);
            }
        }
        match self.formats.get(&from).cloned() {
            Some(fmt) => {
                self.formats.insert(to, fmt);
            }
            None => {
                self.formats.remove(&to);
            }
        }
    }

    fn set_number_format(&mut self, col: u32, row: u32, format_code: &str) {
        self.formats.insert((col, row), format_code.to_string());
    }
}

/// Shared handle to a [`MemorySheet`]; clones observe the same sheet.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    path: PathBuf,
    sheet: Arc<Mutex<MemorySheet>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryFile {
    pub fn new(sheet: MemorySheet) -> Self {
        Self {
            path: PathBuf::from("memory://indicators.xlsx"),
            sheet: Arc::new(Mutex::new(sheet)),
            saves: Arc::new(Mutex::new(0)),
        }
    }

    /// Reports `path` as the store location, e.g. a real file for backups.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn snapshot(&self) -> MemorySheet {
        self.sheet.lock().unwrap().clone()
    }

    pub fn replace(&self, sheet: MemorySheet) {
        *self.sheet.lock().unwrap() = sheet;
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl StoreFile for MemoryFile {
    type Sheet = MemorySheet;

    fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<MemorySheet, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, sheet: &MemorySheet) -> Result<(), StoreError> {
        self.replace(sheet.clone());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}
