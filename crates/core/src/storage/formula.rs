//! Row-by-row formula propagation for the derived zone.
//!
//! Formulas are tokenised into verbatim text and A1-style cell references so
//! that relative row components can be shifted while absolute ones (`A$1`,
//! `$A$1`) stay untouched. String literals, quoted sheet names, function
//! names and sheet prefixes are never treated as references.

use crate::layout::{column_letters, column_number, FIRST_DATA_ROW};
use crate::storage::sheet::{CellContent, Sheet};
use std::fmt;
use std::ops::RangeInclusive;

pub const MAX_ROW: u32 = 1_048_576;
pub const MAX_COLUMN: u32 = 16_384;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("malformed cell reference `{reference}`")]
    MalformedReference { reference: String },

    #[error("reference `{reference}` shifted by {delta} leaves the sheet")]
    RowOutOfRange { reference: String, delta: i64 },

    #[error("unterminated {kind} starting at byte {offset}")]
    Unterminated { kind: &'static str, offset: usize },

    #[error("row {target_row} has no previous data row to inherit formulas from")]
    NoSourceRow { target_row: u32 },

    #[error("no derived column could be propagated from row {source_row} to row {target_row} ({failed} failed)")]
    NothingPropagated {
        source_row: u32,
        target_row: u32,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub column: u32,
    pub column_absolute: bool,
    pub row: u32,
    pub row_absolute: bool,
}

impl CellRef {
    /// Shifts the row by `delta` unless the row component is absolute.
    pub fn shifted(self, delta: i64) -> Result<Self, FormulaError> {
        if self.row_absolute || delta == 0 {
            return Ok(self);
        }
        let row = i64::from(self.row) + delta;
        if row < 1 || row > i64::from(MAX_ROW) {
            return Err(FormulaError::RowOutOfRange {
                reference: self.to_string(),
                delta,
            });
        }
        Ok(Self {
            row: row as u32,
            ..self
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column_absolute {
            f.write_str("$")?;
        }
        f.write_str(&column_letters(self.column))?;
        if self.row_absolute {
            f.write_str("$")?;
        }
        write!(f, "{}", self.row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Ref(CellRef),
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'$'
}

/// Parses `$?LETTERS$?DIGITS`. `Ok(None)` means the word is not shaped like
/// a cell reference at all (a name, number or keyword).
fn parse_reference(word: &str) -> Result<Option<CellRef>, FormulaError> {
    let bytes = word.as_bytes();
    let mut i = 0;

    let column_absolute = bytes.first() == Some(&b'$');
    if column_absolute {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_uppercase() {
        i += 1;
    }
    let letters = &word[letters_start..i];

    let row_absolute = bytes.get(i) == Some(&b'$');
    if row_absolute {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let digits = &word[digits_start..i];

    if i != bytes.len() || letters.is_empty() || digits.is_empty() || letters.len() > 3 {
        return Ok(None);
    }

    let column = column_number(letters);
    if column == 0 || column > MAX_COLUMN {
        return Ok(None);
    }

    let malformed = || FormulaError::MalformedReference {
        reference: word.to_string(),
    };
    let row: u32 = digits.parse().map_err(|_| malformed())?;
    if row == 0 || row > MAX_ROW {
        return Err(malformed());
    }

    Ok(Some(CellRef {
        column,
        column_absolute,
        row,
        row_absolute,
    }))
}

/// Splits a formula (without the leading `=`) into verbatim text and cell
/// references.
pub fn tokenize(formula: &str) -> Result<Vec<Token<'_>>, FormulaError> {
    let bytes = formula.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                let kind = if quote == b'"' { "string literal" } else { "quoted sheet name" };
                let start = i;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(FormulaError::Unterminated { kind, offset: start }),
                        Some(b) if *b == quote => {
                            // Doubled quote is an escaped quote.
                            if bytes.get(i + 1) == Some(&quote) {
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                let word = &formula[start..i];

                let mut next = i;
                while next < bytes.len() && bytes[next] == b' ' {
                    next += 1;
                }
                // Function names (`LOG10(`) and sheet prefixes (`AB1!`) are not references.
                if matches!(bytes.get(next), Some(b'(') | Some(b'!')) {
                    continue;
                }

                if let Some(cell) = parse_reference(word)? {
                    if text_start < start {
                        tokens.push(Token::Text(&formula[text_start..start]));
                    }
                    tokens.push(Token::Ref(cell));
                    text_start = i;
                }
            }
            _ => i += 1,
        }
    }

    if text_start < bytes.len() {
        tokens.push(Token::Text(&formula[text_start..]));
    }
    Ok(tokens)
}

/// Rewrites every relative row reference by `delta`; absolute rows are kept
/// byte-identical.
pub fn shift_relative_rows(formula: &str, delta: i64) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(formula.len() + 8);
    for token in tokenize(formula)? {
        match token {
            Token::Text(s) => out.push_str(s),
            Token::Ref(cell) => out.push_str(&cell.shifted(delta)?.to_string()),
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFailure {
    pub column: u32,
    pub error: FormulaError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub copied: usize,
    pub skipped_literals: usize,
    pub failed: Vec<ColumnFailure>,
}

/// Clones every derived-zone formula of `source_row` into `target_row`,
/// shifting relative rows by `target_row - source_row` and copying styles.
///
/// Literal source cells are left alone, so the target keeps whatever the
/// input-zone write put there. A column whose formula cannot be rewritten is
/// skipped with a warning; the row fails only when nothing was copied.
pub fn propagate_row<S: Sheet + ?Sized>(
    sheet: &mut S,
    source_row: u32,
    target_row: u32,
    columns: RangeInclusive<u32>,
) -> Result<PropagationReport, FormulaError> {
    if source_row < FIRST_DATA_ROW {
        return Err(FormulaError::NoSourceRow { target_row });
    }

    let delta = i64::from(target_row) - i64::from(source_row);
    let mut report = PropagationReport::default();

    for col in columns {
        let formula = match sheet.cell(col, source_row) {
            CellContent::Formula(f) => f,
            CellContent::Empty => continue,
            CellContent::Number(_) | CellContent::Text(_) => {
                report.skipped_literals += 1;
                continue;
            }
        };

        match shift_relative_rows(&formula, delta) {
            Ok(shifted) => {
                sheet.set_formula(col, target_row, &shifted);
                sheet.copy_style((col, source_row), (col, target_row));
                report.copied += 1;
            }
            Err(error) => {
                tracing::warn!(
                    cell = %format!("{}{}", column_letters(col), source_row),
                    target_row,
                    error = %error,
                    "formula not propagated; skipping column"
                );
                report.failed.push(ColumnFailure { column: col, error });
            }
        }
    }

    if report.copied == 0 {
        return Err(FormulaError::NothingPropagated {
            source_row,
            target_row,
            failed: report.failed.len(),
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemorySheet;

    fn shift(f: &str, delta: i64) -> String {
        shift_relative_rows(f, delta).unwrap()
    }

    #[test]
    fn shifts_relative_rows_and_keeps_absolute_rows() {
        assert_eq!(shift("C4637/P4637", 1), "C4638/P4638");
        assert_eq!(shift("$A4637+A$4637+$A$4637", 1), "$A4638+A$4637+$A$4637");
        assert_eq!(
            shift("AVERAGE(R3900:R4637)-STDEV(R$2:R4637)", 1),
            "AVERAGE(R3901:R4638)-STDEV(R$2:R4638)"
        );
    }

    #[test]
    fn leaves_functions_strings_and_sheet_prefixes_alone() {
        assert_eq!(shift("LOG10(B10)", 1), "LOG10(B11)");
        assert_eq!(shift("ATAN2 (A1, B1)", 2), "ATAN2 (A3, B3)");
        assert_eq!(shift("IF(A5>0,\"A5 up\",\"\")", 1), "IF(A6>0,\"A5 up\",\"\")");
        assert_eq!(shift("'Sheet A1'!B2+AB1!C3", 1), "'Sheet A1'!B3+AB1!C4");
        assert_eq!(shift("1.5E+10*A2", 1), "1.5E+10*A3");
        assert_eq!(shift("SUM(A:A)+_xlfn.STDEV.S(B2:B9)", 1), "SUM(A:A)+_xlfn.STDEV.S(B3:B10)");
        assert_eq!(shift("IFERROR(#REF!,0)", 1), "IFERROR(#REF!,0)");
    }

    #[test]
    fn tokenizer_exposes_reference_components() {
        let tokens = tokenize("$DN$4637+DN4636").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ref(CellRef {
                    column: 118,
                    column_absolute: true,
                    row: 4637,
                    row_absolute: true,
                }),
                Token::Text("+"),
                Token::Ref(CellRef {
                    column: 118,
                    column_absolute: false,
                    row: 4636,
                    row_absolute: false,
                }),
            ]
        );
    }

    #[test]
    fn words_longer_than_three_letters_are_names() {
        assert_eq!(shift("ABCD12+TRUE", 1), "ABCD12+TRUE");
    }

    #[test]
    fn reports_malformed_and_out_of_range_references() {
        assert!(matches!(
            shift_relative_rows("A0+1", 1),
            Err(FormulaError::MalformedReference { .. })
        ));
        assert!(matches!(
            shift_relative_rows("A1", -1),
            Err(FormulaError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            shift_relative_rows("IF(A1,\"open", 1),
            Err(FormulaError::Unterminated { .. })
        ));
    }

    #[test]
    fn propagates_formulas_and_styles_into_the_next_row() {
        let mut sheet = MemorySheet::default();
        sheet.put(18, 10, CellContent::Formula("1/P10-O10/100".into()));
        sheet.put_style(18, 10, "pct");
        sheet.put(19, 10, CellContent::Formula("AVERAGE(R$2:R10)".into()));
        sheet.put(118, 10, CellContent::Number(3171.0));

        let report = propagate_row(&mut sheet, 10, 11, 17..=157).unwrap();
        assert_eq!(report.copied, 2);
        assert_eq!(report.skipped_literals, 1);
        assert!(report.failed.is_empty());

        assert_eq!(sheet.cell(18, 11), CellContent::Formula("1/P11-O11/100".into()));
        assert_eq!(sheet.cell(19, 11), CellContent::Formula("AVERAGE(R$2:R11)".into()));
        assert_eq!(sheet.style(18, 11), Some("pct"));
        // Literal source cells are not propagated.
        assert_eq!(sheet.cell(118, 11), CellContent::Empty);
    }

    #[test]
    fn one_bad_column_is_skipped_but_an_all_bad_row_fails() {
        let mut sheet = MemorySheet::default();
        sheet.put(18, 10, CellContent::Formula("A10*2".into()));
        sheet.put(19, 10, CellContent::Formula("IF(A10,\"x".into()));

        let report = propagate_row(&mut sheet, 10, 11, 17..=157).unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].column, 19);
        assert_eq!(sheet.cell(19, 11), CellContent::Empty);

        let mut broken = MemorySheet::default();
        broken.put(18, 10, CellContent::Formula("A0".into()));
        assert_eq!(
            propagate_row(&mut broken, 10, 11, 17..=157),
            Err(FormulaError::NothingPropagated {
                source_row: 10,
                target_row: 11,
                failed: 1
            })
        );
    }

    #[test]
    fn first_data_row_has_nothing_to_inherit() {
        let mut sheet = MemorySheet::default();
        assert_eq!(
            propagate_row(&mut sheet, 1, 2, 17..=157),
            Err(FormulaError::NoSourceRow { target_row: 2 })
        );
    }
}
