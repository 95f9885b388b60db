use anyhow::Context;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub fn ledger_path_for(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".gaps.json");
    PathBuf::from(name)
}

/// A trading date that was skipped while a later date was appended. The
/// calendar will never offer it again, so it has to be backfilled by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapEntry {
    pub date: NaiveDate,
    pub reason: String,
    pub recorded_at: String,
    pub run_id: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapLedger {
    #[serde(default)]
    pub gaps: Vec<GapEntry>,
}

impl GapLedger {
    /// Missing file means no known gaps.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read gap ledger {}", path.display()))
            }
        };
        serde_json::from_str(&text)
            .with_context(|| format!("gap ledger is not valid JSON: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize gap ledger")?;
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        std::fs::write(&partial, json)
            .with_context(|| format!("failed to write {}", partial.display()))?;
        std::fs::rename(&partial, path)
            .with_context(|| format!("failed to replace gap ledger {}", path.display()))?;
        Ok(())
    }

    /// Adds entries, replacing any existing entry for the same date. Returns
    /// how many dates were not already known.
    pub fn record(&mut self, entries: impl IntoIterator<Item = GapEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            match self.gaps.iter_mut().find(|g| g.date == entry.date) {
                Some(existing) => *existing = entry,
                None => {
                    self.gaps.push(entry);
                    added += 1;
                }
            }
        }
        self.gaps.sort_by_key(|g| g.date);
        added
    }

    /// Drops gaps that have since been filled out of band.
    pub fn forget_filled(&mut self, is_filled: impl Fn(NaiveDate) -> bool) -> Vec<NaiveDate> {
        let filled: Vec<NaiveDate> = self
            .gaps
            .iter()
            .map(|g| g.date)
            .filter(|d| is_filled(*d))
            .collect();
        self.gaps.retain(|g| !filled.contains(&g.date));
        filled
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.gaps.iter().map(|g| g.date).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }
}
