//! Fixed column layout of the indicator sheet.
//!
//! Columns are 1-based, matching spreadsheet numbering (A = 1). The mapping
//! is configuration, not derived from the header row.

use serde::Serialize;

/// Converts column letters ("A", "AF", "EW") to a 1-based column number.
/// Returns 0 for anything that is not 1..=3 uppercase ASCII letters.
pub const fn column_number(letters: &str) -> u32 {
    let bytes = letters.as_bytes();
    if bytes.is_empty() || bytes.len() > 3 {
        return 0;
    }
    let mut out: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_uppercase() {
            return 0;
        }
        out = out * 26 + (b - b'A' + 1) as u32;
        i += 1;
    }
    out
}

/// Inverse of [`column_number`]. Column 0 renders as an empty string.
pub fn column_letters(mut column: u32) -> String {
    let mut out = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        out.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub const HEADER_ROW: u32 = 1;
pub const FIRST_DATA_ROW: u32 = 2;
pub const DATE_COLUMN: u32 = column_number("A");

/// Last column read as input data (A..Q).
pub const INPUT_LAST_COLUMN: u32 = column_number("Q");

/// Derived zone: per-row formulas cloned from the row above. Starts at Q
/// because the PE reciprocal is usually a formula rather than fetched data.
pub const DERIVED_FIRST_COLUMN: u32 = column_number("Q");
pub const DERIVED_LAST_COLUMN: u32 = column_number("FA");

pub const MA20_NUMBER_FORMAT: &str = "0.00\"%\"";

/// Numeric input-zone fields, in column order after the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Turnover,
    Close,
    EquityFund,
    BondFund,
    DividendYield,
    MarginBalance,
    Advancing,
    Flat,
    Declining,
    LimitUp,
    LimitDown,
    Rsi20,
    BreadthMa20,
    TreasuryYield,
    PeTtm,
    PeInverse,
}

impl Field {
    pub const ALL: [Field; 16] = [
        Field::Turnover,
        Field::Close,
        Field::EquityFund,
        Field::BondFund,
        Field::DividendYield,
        Field::MarginBalance,
        Field::Advancing,
        Field::Flat,
        Field::Declining,
        Field::LimitUp,
        Field::LimitDown,
        Field::Rsi20,
        Field::BreadthMa20,
        Field::TreasuryYield,
        Field::PeTtm,
        Field::PeInverse,
    ];

    pub const fn column(self) -> u32 {
        match self {
            Field::Turnover => column_number("B"),
            Field::Close => column_number("C"),
            Field::EquityFund => column_number("D"),
            Field::BondFund => column_number("E"),
            Field::DividendYield => column_number("F"),
            Field::MarginBalance => column_number("G"),
            Field::Advancing => column_number("H"),
            Field::Flat => column_number("I"),
            Field::Declining => column_number("J"),
            Field::LimitUp => column_number("K"),
            Field::LimitDown => column_number("L"),
            Field::Rsi20 => column_number("M"),
            Field::BreadthMa20 => column_number("N"),
            Field::TreasuryYield => column_number("O"),
            Field::PeTtm => column_number("P"),
            Field::PeInverse => column_number("Q"),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Field::Turnover => "turnover",
            Field::Close => "close",
            Field::EquityFund => "equity_fund",
            Field::BondFund => "bond_fund",
            Field::DividendYield => "dividend",
            Field::MarginBalance => "margin",
            Field::Advancing => "rise",
            Field::Flat => "flat",
            Field::Declining => "fall",
            Field::LimitUp => "limit_up",
            Field::LimitDown => "limit_down",
            Field::Rsi20 => "rsi",
            Field::BreadthMa20 => "ma20",
            Field::TreasuryYield => "treasury",
            Field::PeTtm => "pe_ttm",
            Field::PeInverse => "pe_inverse",
        }
    }
}

/// Incrementing sequence column seeded by one explicit anchor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceAnchor {
    pub column: u32,
    pub row: u32,
    pub value: i64,
}

impl SequenceAnchor {
    /// Value implied by the anchor alone, for rows at or after it.
    pub fn seeded_value(&self, row: u32) -> Option<i64> {
        (row >= self.row).then(|| self.value + i64::from(row - self.row))
    }
}

#[derive(Debug, Clone)]
pub struct SheetLayout {
    pub derived_first_column: u32,
    pub derived_last_column: u32,
    pub sequence: Option<SequenceAnchor>,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            derived_first_column: DERIVED_FIRST_COLUMN,
            derived_last_column: DERIVED_LAST_COLUMN,
            sequence: Some(SequenceAnchor {
                column: column_number("DN"),
                row: 4637,
                value: 3171,
            }),
        }
    }
}
