use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

// Lock files are advisory: they only guard against overlapping runs of this
// pipeline against the same store.
const DEFAULT_STALE_MINS: i64 = 360;

pub fn lock_path_for(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

pub fn stale_after_from_env() -> Duration {
    let mins = crate::config::parsed_env::<i64>("RUN_LOCK_STALE_MINS")
        .filter(|m| *m > 0)
        .unwrap_or(DEFAULT_STALE_MINS);
    Duration::minutes(mins)
}

/// Held run lock; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %err, "failed to release run lock");
        }
    }
}

/// Returns `None` when another run holds a fresh lock on `store`.
pub fn try_acquire_store_lock(
    store: &Path,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> anyhow::Result<Option<RunLock>> {
    let path = lock_path_for(store);

    match create_lock_file(&path, now) {
        Ok(()) => return Ok(Some(RunLock { path })),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create run lock {}", path.display()))
        }
    }

    let acquired_at = read_acquired_at(&path);
    let stale = match acquired_at {
        Some(at) => now - at > stale_after,
        // Unreadable lock: treat as stale rather than blocking forever.
        None => true,
    };
    if !stale {
        return Ok(None);
    }

    tracing::warn!(
        lock = %path.display(),
        acquired_at = ?acquired_at,
        "taking over stale run lock"
    );
    std::fs::remove_file(&path)
        .with_context(|| format!("failed to remove stale run lock {}", path.display()))?;

    match create_lock_file(&path, now) {
        Ok(()) => Ok(Some(RunLock { path })),
        // Another run won the takeover race.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to create run lock {}", path.display())),
    }
}

fn create_lock_file(path: &Path, now: DateTime<Utc>) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    writeln!(file, "pid={}", std::process::id())?;
    writeln!(file, "acquired_at={}", now.to_rfc3339())?;
    Ok(())
}

fn read_acquired_at(path: &Path) -> Option<DateTime<Utc>> {
    let text = std::fs::read_to_string(path).ok()?;
    let value = text
        .lines()
        .find_map(|line| line.strip_prefix("acquired_at="))?;
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
    }

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");

        let lock = try_acquire_store_lock(&store, now(), Duration::hours(6))
            .unwrap()
            .unwrap();
        assert!(lock.path().ends_with("indicators.xlsx.lock"));
        assert!(try_acquire_store_lock(&store, now(), Duration::hours(6))
            .unwrap()
            .is_none());

        drop(lock);
        assert!(!lock_path_for(&store).exists());
        assert!(try_acquire_store_lock(&store, now(), Duration::hours(6))
            .unwrap()
            .is_some());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");

        let old = try_acquire_store_lock(&store, now() - Duration::hours(7), Duration::hours(6))
            .unwrap()
            .unwrap();
        // Simulate a crashed holder that never released.
        std::mem::forget(old);

        let lock = try_acquire_store_lock(&store, now(), Duration::hours(6)).unwrap();
        assert!(lock.is_some());
        let text = std::fs::read_to_string(lock_path_for(&store)).unwrap();
        assert!(text.contains(&now().to_rfc3339()));
    }

    #[test]
    fn garbage_lock_file_counts_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("indicators.xlsx");
        std::fs::write(lock_path_for(&store), b"???").unwrap();

        assert!(try_acquire_store_lock(&store, now(), Duration::hours(6))
            .unwrap()
            .is_some());
    }
}
