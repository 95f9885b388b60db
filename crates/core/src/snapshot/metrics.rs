use crate::domain::snapshot::{IndicatorMetrics, IndicatorStatus};

const LOW_PERCENTILE: f64 = 30.0;
const HIGH_PERCENTILE: f64 = 70.0;
const WEEK_POINTS: usize = 5;

/// Which end of the distribution reads as an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Low readings are attractive (sentiment gauges).
    LowIsAttractive,
    /// High readings are attractive (risk premium).
    HighIsAttractive,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusText {
    pub attractive: &'static str,
    pub neutral: &'static str,
    pub caution: &'static str,
    pub empty: &'static str,
}

/// Share of `values` at or below `current`, in percent.
pub fn percentile(values: &[f64], current: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let at_or_below = values.iter().filter(|v| **v <= current).count();
    at_or_below as f64 / values.len() as f64 * 100.0
}

/// Change of the last value against the value five points back, in percent.
/// Zero when the series is too short or the base is zero.
pub fn weekly_change(values: &[f64]) -> f64 {
    let n = values.len();
    if n < WEEK_POINTS {
        return 0.0;
    }
    let base = values[n - WEEK_POINTS];
    if base == 0.0 {
        return 0.0;
    }
    (values[n - 1] - base) / base * 100.0
}

pub fn status(percentile: f64, polarity: Polarity) -> IndicatorStatus {
    let (low, high) = match polarity {
        Polarity::LowIsAttractive => (IndicatorStatus::Attractive, IndicatorStatus::Caution),
        Polarity::HighIsAttractive => (IndicatorStatus::Caution, IndicatorStatus::Attractive),
    };
    if percentile < LOW_PERCENTILE {
        low
    } else if percentile > HIGH_PERCENTILE {
        high
    } else {
        IndicatorStatus::Neutral
    }
}

pub fn compute_metrics(
    values: &[f64],
    polarity: Polarity,
    value_suffix: &str,
    text: &StatusText,
) -> IndicatorMetrics {
    let Some(&current) = values.last() else {
        return IndicatorMetrics {
            current_value: "N/A".to_string(),
            percentile_5y: "N/A".to_string(),
            change_weekly: "N/A".to_string(),
            status: IndicatorStatus::Neutral,
            description: text.empty.to_string(),
        };
    };

    let pct = percentile(values, current);
    let status = status(pct, polarity);
    let description = match status {
        IndicatorStatus::Attractive => text.attractive,
        IndicatorStatus::Neutral => text.neutral,
        IndicatorStatus::Caution => text.caution,
    };

    IndicatorMetrics {
        current_value: format!("{current:.2}{value_suffix}"),
        percentile_5y: format!("{pct:.1}%"),
        change_weekly: format!("{:+.2}%", weekly_change(values)),
        status,
        description: description.to_string(),
    }
}
