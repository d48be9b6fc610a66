//! Timestamp capture and restoration.
//!
//! Access and last-write times are carried from source to destination.
//! Creation time is captured where the platform reports it but only
//! restored on Windows; elsewhere it is left to the filesystem.

use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Timestamps captured from a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub accessed: FileTime,
    pub modified: FileTime,
    pub created: Option<SystemTime>,
}

impl FileTimes {
    /// Read the timestamps of `path`
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            accessed: FileTime::from_last_access_time(metadata),
            modified: FileTime::from_last_modification_time(metadata),
            created: metadata.created().ok(),
        }
    }

    /// Apply these timestamps to `path`
    pub fn apply_to_path(&self, path: &Path) -> std::io::Result<()> {
        filetime::set_file_times(path, self.accessed, self.modified)?;

        #[cfg(windows)]
        if let Some(created) = self.created {
            use std::os::windows::fs::FileTimesExt;

            let file = fs::File::options().write(true).open(path)?;
            file.set_times(fs::FileTimes::new().set_created(created))?;
        }

        Ok(())
    }
}

/// Last-write time of `path`, `None` if it does not exist or is unreadable
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
