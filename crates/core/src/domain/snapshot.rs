use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-optimised export of every indicator series, regenerated on each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub generated_at: String,
    /// Indicator group id -> indicator id -> series.
    #[serde(flatten)]
    pub groups: BTreeMap<String, BTreeMap<String, IndicatorData>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorData {
    pub indicator_id: String,
    pub indicator_name: String,
    pub data_points: Vec<DataPoint>,
    pub metrics: IndicatorMetrics,
    pub last_update: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub date: String,
    pub value: f64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorMetrics {
    pub current_value: String,
    pub percentile_5y: String,
    pub change_weekly: String,
    pub status: IndicatorStatus,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorStatus {
    Attractive,
    Neutral,
    Caution,
}
