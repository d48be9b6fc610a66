//! Persistence: real-time state, audit trail and job definitions.

pub mod audit;
pub mod jobs;
pub mod state;

pub use audit::{ActionKind, AuditLog, JsonLinesAuditLog, LogEntry, MemoryAuditLog, XmlAuditLog};
pub use jobs::JobRepository;
pub use state::{JsonStateStore, MemoryStateStore, StateStore};

use std::io::Write;
use std::path::Path;

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)
}
