use crate::layout::Field;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// One trading day's input-zone values. Derived columns are never held here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub values: BTreeMap<Field, f64>,
}

impl DayRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.values.get(&field).copied()
    }

    /// Non-finite numbers are treated as missing.
    pub fn set(&mut self, field: Field, value: Option<f64>) {
        match value.filter(|v| v.is_finite()) {
            Some(v) => {
                self.values.insert(field, v);
            }
            None => {
                self.values.remove(&field);
            }
        }
    }

    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing: Vec<&'static str> = [Field::Close, Field::Turnover]
            .into_iter()
            .filter(|f| self.get(*f).is_none())
            .map(Field::name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingRequiredField { fields: missing })
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required fields: {}", fields.join(", "))]
    MissingRequiredField { fields: Vec<&'static str> },
}
