//! Recursive source enumeration.
//!
//! Lists every file below a source root together with the aggregate byte
//! size. Unreadable metadata never aborts a walk: the file stays listed but
//! does not count towards the total.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// A file discovered below the source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the source root, reused under the target root
    pub relative_path: PathBuf,

    /// Length in bytes, `None` when metadata could not be read
    pub size: Option<u64>,
}

impl FileEntry {
    /// Resolves symlinks to their target. Links to directories and dangling
    /// links yield `None`.
    fn from_entry(entry: &DirEntry, root: &Path) -> Option<Self> {
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let size = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return None,
                Ok(resolved) => Some(resolved.len()),
                Err(e) => {
                    debug!("Skipping dangling symlink {}: {}", path.display(), e);
                    return None;
                }
            }
        } else {
            match entry.metadata() {
                Ok(metadata) => Some(metadata.len()),
                Err(e) => {
                    warn!("Cannot read metadata of {}: {}", path.display(), e);
                    None
                }
            }
        };

        Some(Self {
            path,
            relative_path,
            size,
        })
    }

    /// Size used for accounting; unknown sizes count as zero.
    pub fn len(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of walking a source tree
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub files: Vec<FileEntry>,
    pub total_size: u64,
}

impl Enumeration {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Walk a directory tree and collect every file
///
/// # Arguments
/// * `root` - Source root, walked without depth limit
///
/// # Returns
/// * `Ok(Enumeration)` - All listable files plus their aggregate size
/// * `Err(io::Error)` - If the root itself cannot be read
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::enumerate;
/// use std::path::Path;
///
/// let listing = enumerate(Path::new("/data")).unwrap();
/// println!("Found {} files ({} bytes)", listing.file_count(), listing.total_size);
/// ```
pub fn enumerate(root: &Path) -> std::io::Result<Enumeration> {
    let mut listing = Enumeration::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("cannot read source root")));
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(file) = FileEntry::from_entry(&entry, root) {
            if let Some(size) = file.size {
                listing.total_size += size;
            }
            listing.files.push(file);
        }
    }

    Ok(listing)
}

/// Aggregate size of every file below `root`
pub fn total_size(root: &Path) -> std::io::Result<u64> {
    enumerate(root).map(|listing| listing.total_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_enumerate_nested() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::write(root.join("a.txt"), b"hello")?;
        fs::create_dir_all(root.join("sub/deeper"))?;
        fs::write(root.join("sub/b.pdf"), b"0123456789")?;
        fs::write(root.join("sub/deeper/c.bin"), vec![0u8; 100])?;

        let listing = enumerate(root)?;
        assert_eq!(listing.file_count(), 3);
        assert_eq!(listing.total_size, 115);

        let mut relative: Vec<_> = listing
            .files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();
        relative.sort();
        assert_eq!(relative, vec!["a.txt", "sub/b.pdf", "sub/deeper/c.bin"]);

        Ok(())
    }

    #[test]
    fn test_enumerate_empty_dir() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("empty"))?;

        let listing = enumerate(temp_dir.path())?;
        assert_eq!(listing.file_count(), 0);
        assert_eq!(listing.total_size, 0);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(enumerate(&temp_dir.path().join("nope")).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_dangling_symlink_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("real.txt"), b"abc")?;
        std::os::unix::fs::symlink(root.join("gone.txt"), root.join("dangling"))?;
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt"))?;

        let listing = enumerate(root)?;
        assert_eq!(listing.file_count(), 2);
        assert_eq!(listing.total_size, 6);
        Ok(())
    }

    #[test]
    fn test_total_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("x"), vec![1u8; 2048])?;
        assert_eq!(total_size(temp_dir.path())?, 2048);
        Ok(())
    }
}
