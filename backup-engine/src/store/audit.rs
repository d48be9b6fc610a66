//! Structured audit trail of backup actions.
//!
//! Recording is fire-and-forget: a failing audit sink is reported through
//! tracing and never interrupts a backup.

use chrono::{DateTime, Local, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    FileTransfer,
    DirCreate,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub backup_name: String,
    /// Source path, or the message for non-transfer entries
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub file_size: u64,
    /// -1 when the transfer failed
    pub transfer_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_time_ms: Option<i64>,
    pub success: bool,
    pub action: ActionKind,
}

impl LogEntry {
    fn base(backup_name: &str, source: String, action: ActionKind, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            backup_name: backup_name.to_string(),
            source,
            destination: None,
            file_size: 0,
            transfer_time_ms: 0,
            encryption_time_ms: None,
            success,
            action,
        }
    }

    pub fn transfer(
        backup_name: &str,
        source: &Path,
        destination: &Path,
        file_size: u64,
        elapsed: Duration,
    ) -> Self {
        Self {
            destination: Some(destination.display().to_string()),
            file_size,
            transfer_time_ms: elapsed.as_millis() as i64,
            ..Self::base(
                backup_name,
                source.display().to_string(),
                ActionKind::FileTransfer,
                true,
            )
        }
    }

    pub fn transfer_failed(
        backup_name: &str,
        source: &Path,
        destination: &Path,
        file_size: u64,
    ) -> Self {
        Self {
            destination: Some(destination.display().to_string()),
            file_size,
            transfer_time_ms: -1,
            ..Self::base(
                backup_name,
                source.display().to_string(),
                ActionKind::FileTransfer,
                false,
            )
        }
    }

    pub fn with_encryption(mut self, elapsed_ms: i64) -> Self {
        self.encryption_time_ms = Some(elapsed_ms);
        self
    }

    pub fn dir_created(backup_name: &str, path: &Path) -> Self {
        Self::base(
            backup_name,
            path.display().to_string(),
            ActionKind::DirCreate,
            true,
        )
    }

    pub fn error(backup_name: &str, message: impl Into<String>) -> Self {
        Self::base(backup_name, message.into(), ActionKind::Error, false)
    }

    pub fn warning(backup_name: &str, message: impl Into<String>) -> Self {
        Self::base(backup_name, message.into(), ActionKind::Warning, true)
    }

    pub fn info(backup_name: &str, message: impl Into<String>) -> Self {
        Self::base(backup_name, message.into(), ActionKind::Info, true)
    }
}

pub trait AuditLog: Send + Sync {
    fn record(&self, entry: LogEntry);
}

/// File for today's entries under `dir`
fn daily_file(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", Local::now().format("%Y-%m-%d"), extension))
}

fn append_to(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)
}

/// Appends one JSON object per line to `<dir>/<YYYY-MM-DD>.json`
#[derive(Debug)]
pub struct JsonLinesAuditLog {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// File receiving today's entries
    pub fn daily_path(&self) -> PathBuf {
        daily_file(&self.dir, "json")
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        append_to(&self.dir, &self.daily_path(), &line)
    }
}

impl AuditLog for JsonLinesAuditLog {
    fn record(&self, entry: LogEntry) {
        if let Err(e) = self.append(&entry) {
            warn!("Failed to write audit entry to {}: {}", self.dir.display(), e);
        }
    }
}

/// Appends one `<LogEntry>` element per line to `<dir>/<YYYY-MM-DD>.xml`.
///
/// The file is a sequence of elements without a root, so appending never
/// rewrites earlier entries.
#[derive(Debug)]
pub struct XmlAuditLog {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl XmlAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn daily_path(&self) -> PathBuf {
        daily_file(&self.dir, "xml")
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let mut element = render_xml(entry)?;
        element.push(b'\n');

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        append_to(&self.dir, &self.daily_path(), &element)
    }
}

impl AuditLog for XmlAuditLog {
    fn record(&self, entry: LogEntry) {
        if let Err(e) = self.append(&entry) {
            warn!("Failed to write audit entry to {}: {}", self.dir.display(), e);
        }
    }
}

fn xml_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

fn render_xml(entry: &LogEntry) -> io::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());

    let action = match entry.action {
        ActionKind::FileTransfer => "FileTransfer",
        ActionKind::DirCreate => "DirCreate",
        ActionKind::Error => "Error",
        ActionKind::Warning => "Warning",
        ActionKind::Info => "Info",
    };
    let mut fields = vec![
        ("Timestamp", entry.timestamp.to_rfc3339()),
        ("BackupName", entry.backup_name.clone()),
        ("SourcePath", entry.source.clone()),
    ];
    if let Some(destination) = &entry.destination {
        fields.push(("DestinationPath", destination.clone()));
    }
    fields.push(("FileSizeBytes", entry.file_size.to_string()));
    fields.push(("TransferTimeMs", entry.transfer_time_ms.to_string()));
    if let Some(ms) = entry.encryption_time_ms {
        fields.push(("EncryptionTimeMs", ms.to_string()));
    }
    fields.push(("Success", entry.success.to_string()));
    fields.push(("ActionType", action.to_string()));

    writer
        .write_event(Event::Start(BytesStart::new("LogEntry")))
        .map_err(xml_error)?;
    for (name, value) in &fields {
        writer
            .write_event(Event::Start(BytesStart::new(*name)))
            .map_err(xml_error)?;
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(xml_error)?;
        writer
            .write_event(Event::End(BytesEnd::new(*name)))
            .map_err(xml_error)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("LogEntry")))
        .map_err(xml_error)?;

    Ok(writer.into_inner())
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, action: ActionKind, success: bool) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.action == action && e.success == success)
            .count()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_daily_json_lines() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let log = JsonLinesAuditLog::new(dir.path().join("logs"));

        log.record(LogEntry::transfer(
            "docs",
            Path::new("/src/a.txt"),
            Path::new("/dst/a.txt"),
            10,
            Duration::from_millis(4),
        ));
        log.record(LogEntry::dir_created("docs", Path::new("/dst/sub")));
        log.record(LogEntry::error("docs", "boom"));

        let content = std::fs::read_to_string(log.daily_path())?;
        let entries: Vec<LogEntry> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, ActionKind::FileTransfer);
        assert_eq!(entries[0].transfer_time_ms, 4);
        assert_eq!(entries[1].action, ActionKind::DirCreate);
        assert!(!entries[2].success);
        assert_eq!(entries[2].source, "boom");
        Ok(())
    }

    #[test]
    fn test_daily_xml_entries() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let log = XmlAuditLog::new(dir.path().join("logs"));

        log.record(
            LogEntry::transfer(
                "docs & more",
                Path::new("/src/a<b>.txt"),
                Path::new("/dst/a<b>.txt"),
                10,
                Duration::from_millis(4),
            )
            .with_encryption(7),
        );
        log.record(LogEntry::error("docs & more", "boom"));

        let path = log.daily_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("xml"));
        let content = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        assert!(lines[0].starts_with("<LogEntry><Timestamp>"));
        assert!(lines[0].ends_with("</LogEntry>"));
        assert!(lines[0].contains("<BackupName>docs &amp; more</BackupName>"));
        assert!(lines[0].contains("<SourcePath>/src/a&lt;b&gt;.txt</SourcePath>"));
        assert!(lines[0].contains("<DestinationPath>/dst/a&lt;b&gt;.txt</DestinationPath>"));
        assert!(lines[0].contains("<TransferTimeMs>4</TransferTimeMs>"));
        assert!(lines[0].contains("<EncryptionTimeMs>7</EncryptionTimeMs>"));
        assert!(lines[0].contains("<Success>true</Success>"));
        assert!(lines[0].contains("<ActionType>FileTransfer</ActionType>"));

        assert!(!lines[1].contains("DestinationPath"));
        assert!(lines[1].contains("<Success>false</Success>"));
        assert!(lines[1].contains("<ActionType>Error</ActionType>"));
        Ok(())
    }

    #[test]
    fn test_failed_transfer_time() {
        let entry = LogEntry::transfer_failed("docs", Path::new("a"), Path::new("b"), 5);
        assert_eq!(entry.transfer_time_ms, -1);
        assert!(!entry.success);
    }

    #[test]
    fn test_unwritable_dir_is_swallowed() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        // A file where the log directory should be
        let blocker = dir.path().join("logs");
        std::fs::write(&blocker, b"")?;

        let log = JsonLinesAuditLog::new(&blocker);
        log.record(LogEntry::info("docs", "still running"));
        Ok(())
    }
}
