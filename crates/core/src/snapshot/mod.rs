pub mod indicators;
pub mod metrics;
pub mod publish;

use crate::domain::snapshot::{DataPoint, IndicatorData, Snapshot};
use crate::snapshot::indicators::IndicatorGroup;
use crate::snapshot::metrics::compute_metrics;
use crate::storage::store::{SeriesRow, SheetStore, StoreError, StoreFile};
use anyhow::Context;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::Path;

/// Regenerates the full snapshot from the store on every call.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    groups: Vec<IndicatorGroup>,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(indicators::default_groups())
    }
}

impl SnapshotBuilder {
    pub fn new(groups: Vec<IndicatorGroup>) -> Self {
        Self { groups }
    }

    /// Reads every group's columns in one pass over the store and exports
    /// rows dated from the group's start date through `today`.
    pub fn build<F: StoreFile>(
        &self,
        store: &SheetStore<F>,
        today: NaiveDate,
        generated_at: &str,
    ) -> Result<Snapshot, StoreError> {
        let mut columns: Vec<u32> = self
            .groups
            .iter()
            .flat_map(|g| g.fields.iter().map(|f| f.column))
            .collect();
        columns.sort_unstable();
        columns.dedup();

        let first_row = self.groups.iter().map(|g| g.first_row).min().unwrap_or(0);
        let rows = store.read_series(&columns, first_row)?;

        let mut groups = BTreeMap::new();
        for group in &self.groups {
            let series = self.build_group(group, &columns, &rows, today, generated_at);
            tracing::debug!(
                group = group.id,
                points = series.values().next().map_or(0, |s| s.data_points.len()),
                "snapshot group built"
            );
            groups.insert(group.id.to_string(), series);
        }

        Ok(Snapshot {
            generated_at: generated_at.to_string(),
            groups,
        })
    }

    fn build_group(
        &self,
        group: &IndicatorGroup,
        columns: &[u32],
        rows: &[SeriesRow],
        today: NaiveDate,
        generated_at: &str,
    ) -> BTreeMap<String, IndicatorData> {
        let start = NaiveDate::parse_from_str(group.start_date, "%Y-%m-%d").unwrap_or(NaiveDate::MIN);
        let slots: Vec<Option<usize>> = group
            .fields
            .iter()
            .map(|f| columns.binary_search(&f.column).ok())
            .collect();

        let mut selected: Vec<&SeriesRow> = rows
            .iter()
            .filter(|r| r.row >= group.first_row && r.date >= start && r.date <= today)
            .collect();
        selected.sort_by_key(|r| r.date);

        let base: Vec<(String, BTreeMap<String, Option<f64>>)> = selected
            .iter()
            .map(|r| {
                let fields = group
                    .fields
                    .iter()
                    .zip(&slots)
                    .map(|(f, slot)| {
                        let value = slot.and_then(|i| r.values.get(i).copied().flatten());
                        (f.name.to_string(), value)
                    })
                    .collect();
                (r.date.format("%Y-%m-%d").to_string(), fields)
            })
            .collect();

        group
            .indicators
            .iter()
            .map(|ind| {
                let data_points: Vec<DataPoint> = base
                    .iter()
                    .map(|(date, fields)| DataPoint {
                        date: date.clone(),
                        value: fields.get(ind.value_field).copied().flatten().unwrap_or(0.0),
                        fields: fields.clone(),
                    })
                    .collect();
                let values: Vec<f64> = data_points.iter().map(|p| p.value).collect();
                let data = IndicatorData {
                    indicator_id: ind.id.to_string(),
                    indicator_name: ind.name.to_string(),
                    metrics: compute_metrics(&values, group.polarity, group.value_suffix, &group.text),
                    data_points,
                    last_update: generated_at.to_string(),
                };
                (ind.id.to_string(), data)
            })
            .collect()
    }
}

/// Writes the snapshot as JSON via a temp file and rename.
pub fn write_snapshot(snapshot: &Snapshot, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_vec(snapshot).context("failed to serialize snapshot")?;
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = std::path::PathBuf::from(partial);

    std::fs::write(&partial, json).with_context(|| format!("failed to write {}", partial.display()))?;
    std::fs::rename(&partial, path)
        .with_context(|| format!("failed to replace snapshot {}", path.display()))?;

    tracing::info!(path = %path.display(), generated_at = %snapshot.generated_at, "snapshot written");
    Ok(())
}
