//! Priority and size classification of enumerated files.

use std::collections::HashSet;
use std::path::Path;

/// Case-insensitive set of file extensions.
///
/// Configuration may list extensions with or without the leading dot;
/// both forms match the same files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: HashSet<String>,
}

impl ExtensionSet {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| normalize(ext.as_ref()))
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// True when the path's extension is in the set. Files without an
    /// extension never match.
    pub fn matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }
}

fn normalize(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Routing flags for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileClass {
    pub priority: bool,
    pub large: bool,
}

/// Classifies files by extension and size
#[derive(Debug, Clone)]
pub struct Classifier {
    priority: ExtensionSet,
    large_threshold: u64,
}

impl Classifier {
    pub fn new(priority: ExtensionSet, large_threshold: u64) -> Self {
        Self {
            priority,
            large_threshold,
        }
    }

    pub fn is_priority(&self, path: &Path) -> bool {
        self.priority.matches(path)
    }

    /// Strictly larger than the threshold
    pub fn is_large(&self, size: u64) -> bool {
        size > self.large_threshold
    }

    pub fn classify(&self, path: &Path, size: u64) -> FileClass {
        FileClass {
            priority: self.is_priority(path),
            large: self.is_large(size),
        }
    }
}
