use anyhow::Context;
use chrono::{Duration, NaiveDateTime};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
// Names written before millisecond precision was added.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const BACKUP_MARKER: &str = "_backup_";

/// Timestamped full copies of the store, `<stem>_backup_YYYYmmdd_HHMMSS_mmm.<ext>`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    retention_days: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>, retention_days: i64) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backup(&self, store: &Path, now: NaiveDateTime) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create backup dir {}", self.dir.display()))?;

        let (stem, ext) = stem_and_extension(store)?;
        let mut name = format!("{stem}{BACKUP_MARKER}{}", now.format(TIMESTAMP_FORMAT));
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(&ext);
        }
        let target = self.dir.join(name);

        std::fs::copy(store, &target).with_context(|| {
            format!(
                "failed to copy {} to {}",
                store.display(),
                target.display()
            )
        })?;

        tracing::info!(backup = %target.display(), "store backed up");
        Ok(target)
    }

    /// Deletes backups of `store` whose embedded timestamp is older than the
    /// retention window. Files that cannot be deleted are reported, not fatal.
    pub fn prune_backups(&self, store: &Path, now: NaiveDateTime) -> anyhow::Result<PruneReport> {
        let (stem, _) = stem_and_extension(store)?;
        let prefix = format!("{stem}{BACKUP_MARKER}");
        let cutoff = now - Duration::days(self.retention_days);

        let mut report = PruneReport::default();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to list backup dir {}", self.dir.display())
                })
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(taken_at) = backup_timestamp(&path, &prefix) else {
                continue;
            };
            if taken_at >= cutoff {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(backup = %path.display(), "expired backup deleted");
                    report.deleted.push(path);
                }
                Err(err) => {
                    tracing::warn!(backup = %path.display(), error = %err, "failed to delete expired backup");
                    report.failed.push(path);
                }
            }
        }

        report.deleted.sort();
        Ok(report)
    }
}

fn stem_and_extension(store: &Path) -> anyhow::Result<(String, Option<String>)> {
    let stem = store
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("store path has no file name: {}", store.display()))?;
    let ext = store
        .extension()
        .map(|s| s.to_string_lossy().into_owned());
    Ok((stem, ext))
}

fn backup_timestamp(path: &Path, prefix: &str) -> Option<NaiveDateTime> {
    let stem = path.file_stem()?.to_str()?;
    let ts = stem.strip_prefix(prefix)?;
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(ts, LEGACY_TIMESTAMP_FORMAT))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn backup_name_embeds_timestamp_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");
        std::fs::write(&store, b"workbook").unwrap();

        let manager = BackupManager::new(dir.path().join("backups"), 7);
        let path = manager.backup(&store, at(2024, 3, 5, 18)).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "indicators_backup_20240305_180000_000.xlsx"
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"workbook");
    }

    #[test]
    fn prunes_only_backups_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");
        std::fs::write(&store, b"workbook").unwrap();
        let manager = BackupManager::new(dir.path().join("backups"), 7);

        let now = at(2024, 3, 20, 12);
        let old = manager.backup(&store, now - Duration::days(8)).unwrap();
        let recent = manager.backup(&store, now - Duration::days(6)).unwrap();
        let unrelated = manager.dir().join("notes.txt");
        std::fs::write(&unrelated, b"keep").unwrap();

        let report = manager.prune_backups(&store, now).unwrap();

        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(report.failed.is_empty());
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn backups_within_one_second_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");
        std::fs::write(&store, b"first").unwrap();
        let manager = BackupManager::new(dir.path().join("backups"), 7);

        let now = at(2024, 3, 5, 18);
        let first = manager.backup(&store, now).unwrap();
        std::fs::write(&store, b"second").unwrap();
        let second = manager
            .backup(&store, now + Duration::milliseconds(250))
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
    }

    #[test]
    fn second_precision_names_are_still_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");
        let manager = BackupManager::new(dir.path().join("backups"), 7);
        std::fs::create_dir_all(manager.dir()).unwrap();
        let legacy = manager.dir().join("indicators_backup_20240301_120000.xlsx");
        std::fs::write(&legacy, b"old").unwrap();

        let report = manager.prune_backups(&store, at(2024, 3, 20, 12)).unwrap();
        assert_eq!(report.deleted, vec![legacy]);
    }

    #[test]
    fn pruning_a_missing_dir_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("never-created"), 7);
        let report = manager
            .prune_backups(&dir.path().join("indicators.xlsx"), at(2024, 1, 1, 0))
            .unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
