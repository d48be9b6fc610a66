//! Differential skip decision.
//!
//! Pure timestamp heuristic: a file is skipped when its destination copy is
//! at least as new as the source and at least as new as the most recent
//! write anywhere in the destination tree. Contents are never compared.

use crate::fs::metadata::modified_time;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Latest last-write time among all files under `target_root`.
///
/// `None` when the tree is missing, empty or cannot be fully read.
pub fn last_backup_time(target_root: &Path) -> Option<SystemTime> {
    if !target_root.is_dir() {
        return None;
    }

    let mut latest: Option<SystemTime> = None;
    for entry in WalkDir::new(target_root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Cannot scan {} for last backup time: {}", target_root.display(), e);
                return None;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                debug!("Cannot stat {}: {}", entry.path().display(), e);
                return None;
            }
        };
        latest = Some(latest.map_or(modified, |current| current.max(modified)));
    }

    latest
}

/// Skip rule on raw timestamps.
///
/// `dest >= src && (last_backup is None || dest >= last_backup)`
pub fn is_up_to_date(src: SystemTime, dest: SystemTime, last_backup: Option<SystemTime>) -> bool {
    dest >= src && last_backup.map_or(true, |last| dest >= last)
}

/// Whether a differential run may skip copying `source` to `dest`.
///
/// Missing or unreadable timestamps on either side mean the file is copied.
pub fn should_skip(source: &Path, dest: &Path, last_backup: Option<SystemTime>) -> bool {
    let Some(dest_modified) = modified_time(dest) else {
        return false;
    };
    let Some(src_modified) = modified_time(source) else {
        return false;
    };
    is_up_to_date(src_modified, dest_modified, last_backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(secs: i64) -> FileTime {
        FileTime::from_unix_time(secs, 0)
    }

    fn stamp(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, at(secs)).unwrap();
    }

    #[test]
    fn test_rule_on_raw_times() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let later = t + Duration::from_secs(10);

        assert!(is_up_to_date(t, t, None));
        assert!(is_up_to_date(t, later, Some(later)));
        assert!(!is_up_to_date(later, t, None));
        assert!(!is_up_to_date(t, t, Some(later)));
    }

    #[test]
    fn test_last_backup_time_is_max_mtime() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("nested"))?;
        fs::write(dir.path().join("a"), b"a")?;
        fs::write(dir.path().join("nested/b"), b"b")?;
        stamp(&dir.path().join("a"), 1_000);
        stamp(&dir.path().join("nested/b"), 5_000);

        let last = last_backup_time(dir.path()).unwrap();
        assert_eq!(last, SystemTime::UNIX_EPOCH + Duration::from_secs(5_000));
        Ok(())
    }

    #[test]
    fn test_last_backup_time_missing_or_empty() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        assert!(last_backup_time(dir.path()).is_none());
        assert!(last_backup_time(&dir.path().join("missing")).is_none());
        Ok(())
    }

    #[test]
    fn test_should_skip_on_files() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        fs::write(&src, b"source")?;

        // No destination yet
        assert!(!should_skip(&src, &dst, None));

        fs::write(&dst, b"copy")?;
        stamp(&src, 1_000);
        stamp(&dst, 2_000);
        let last = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(2_000));
        assert!(should_skip(&src, &dst, last));

        // Source modified after the copy
        stamp(&src, 3_000);
        assert!(!should_skip(&src, &dst, last));

        // Destination older than another file written by the last backup
        stamp(&src, 1_000);
        let newer_elsewhere = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(2_500));
        assert!(!should_skip(&src, &dst, newer_elsewhere));
        Ok(())
    }
}
