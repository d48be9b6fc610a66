//! Single-file transfer with retry and atomic replacement.
//!
//! Data is streamed into `<dest>.part` next to the destination and renamed
//! over it once complete, so the destination path only ever holds a full
//! copy. Cancellation is polled around every chunk; a cancelled or failed
//! attempt removes its partial file.

use crate::fs::metadata::FileTimes;
use crate::utils::errors::{EngineError, Result};
use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PART_SUFFIX: &str = ".part";

/// Exponential backoff schedule for transient I/O failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    pub buffer_size: usize,
    pub retry: RetryPolicy,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a completed transfer
#[derive(Debug, Clone, Copy)]
pub struct CopyOutcome {
    pub bytes: u64,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Locked, busy or temporarily unavailable files are worth another attempt.
pub fn is_transient(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    match err.raw_os_error() {
        // EAGAIN, EBUSY, ETXTBSY
        #[cfg(unix)]
        Some(11) | Some(16) | Some(26) => true,
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        #[cfg(windows)]
        Some(32) | Some(33) => true,
        _ => false,
    }
}

/// Sibling path receiving data until the copy is complete
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}

/// Create the parent directory of `dest` if needed.
///
/// Returns the directory when it had to be created.
pub async fn ensure_parent(dest: &Path) -> io::Result<Option<PathBuf>> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            if fs::try_exists(parent).await? {
                return Ok(None);
            }
            fs::create_dir_all(parent).await?;
            Ok(Some(parent.to_path_buf()))
        }
        _ => Ok(None),
    }
}

/// Copy `source` to `dest`, retrying transient failures.
///
/// # Errors
/// * `EngineError::Cancelled` - `cancel` fired; no partial output is left behind
/// * `EngineError::Transfer` - a non-transient error, or retries exhausted
pub async fn copy_file(
    source: &Path,
    dest: &Path,
    options: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<CopyOutcome> {
    let buffer_size = options.buffer_size.max(4096);
    with_retry(source, &options.retry, cancel, || {
        copy_once(source, dest, buffer_size, cancel)
    })
    .await
}

/// Drive `attempt_once` until it succeeds, fails for good or runs out of
/// attempts. Only transient `EngineError::Io` failures are retried.
async fn with_retry<F, Fut>(
    source: &Path,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_once: F,
) -> Result<CopyOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let start = Instant::now();
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match attempt_once().await {
            Ok(bytes) => {
                return Ok(CopyOutcome {
                    bytes,
                    elapsed: start.elapsed(),
                    attempts: attempt,
                })
            }
            Err(EngineError::Io(e)) if is_transient(&e) && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Transient error copying {} (attempt {}/{}), retrying in {:?}: {}",
                    source.display(),
                    attempt,
                    attempts,
                    delay,
                    e
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                }
            }
            Err(EngineError::Io(e)) => {
                return Err(EngineError::Transfer {
                    path: source.to_path_buf(),
                    attempts: attempt,
                    source: e,
                })
            }
            Err(e) => return Err(e),
        }
    }
}

async fn copy_once(
    source: &Path,
    dest: &Path,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> Result<u64> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let mut buffer = vec![0u8; buffer_size];
    let part = part_path(dest);
    let result = stream_into(source, &part, dest, &mut buffer, cancel).await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&part).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial file {}: {}", part.display(), e);
            }
        }
    }

    result
}

async fn stream_into(
    source: &Path,
    part: &Path,
    dest: &Path,
    buffer: &mut [u8],
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut reader = File::open(source).await?;
    let times = FileTimes::from_metadata(&reader.metadata().await?);
    let mut writer = File::create(part).await?;
    let mut written = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let n = reader.read(buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n]).await?;
        written += n as u64;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
    }

    writer.flush().await?;
    writer.sync_all().await?;
    drop(writer);

    let part_owned = part.to_path_buf();
    tokio::task::spawn_blocking(move || times.apply_to_path(&part_owned))
        .await
        .map_err(|e| io::Error::other(format!("timestamp task failed: {}", e)))??;

    fs::rename(part, dest).await?;
    debug!("Copied {} -> {} ({} bytes)", source.display(), dest.display(), written);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn fast_options() -> CopyOptions {
        CopyOptions {
            buffer_size: 4096,
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        #[cfg(unix)]
        assert!(is_transient(&io::Error::from_raw_os_error(16)));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/backup/docs/a.txt")),
            PathBuf::from("/backup/docs/a.txt.part")
        );
    }

    #[tokio::test]
    async fn test_copy_preserves_content_and_mtime() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("out/nested/dst.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &data)?;
        let stamp = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&src, stamp)?;

        let created = ensure_parent(&dst).await?;
        assert_eq!(created, Some(dir.path().join("out/nested")));
        assert_eq!(ensure_parent(&dst).await?, None);

        let outcome = copy_file(&src, &dst, &fast_options(), &CancellationToken::new()).await?;
        assert_eq!(outcome.bytes, data.len() as u64);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(std::fs::read(&dst)?, data);
        assert!(!part_path(&dst).exists());

        let copied = FileTime::from_last_modification_time(&std::fs::metadata(&dst)?);
        assert_eq!(copied, stamp);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_copy_leaves_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, vec![7u8; 64 * 1024])?;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = copy_file(&src, &dst, &fast_options(), &cancel).await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(!dst.exists());
        assert!(!part_path(&dst).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_keeps_existing_destination() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, b"new contents")?;
        std::fs::write(&dst, b"previous backup")?;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = copy_file(&src, &dst, &fast_options(), &cancel).await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&dst)?, b"previous backup");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_during_copy_removes_partial_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        std::fs::write(&src, vec![3u8; 16 * 1024 * 1024])?;

        let cancel = CancellationToken::new();
        let part = part_path(&dst);
        let watcher = {
            let cancel = cancel.clone();
            let part = part.clone();
            tokio::spawn(async move {
                loop {
                    let started = std::fs::metadata(&part).map(|m| m.len() > 0).unwrap_or(false);
                    if started {
                        cancel.cancel();
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        let result = copy_file(&src, &dst, &fast_options(), &cancel).await;
        watcher.abort();

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(!dst.exists());
        assert!(!part.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() -> anyhow::Result<()> {
        let mut calls = 0;
        let outcome = with_retry(
            Path::new("flaky.bin"),
            &fast_options().retry,
            &CancellationToken::new(),
            || {
                calls += 1;
                let first = calls == 1;
                async move {
                    if first {
                        Err(EngineError::Io(io::Error::from(io::ErrorKind::Interrupted)))
                    } else {
                        Ok(5)
                    }
                }
            },
        )
        .await?;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.bytes, 5);
        assert_eq!(calls, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let options = fast_options();
        let mut calls = 0;
        let result = with_retry(
            Path::new("locked.bin"),
            &options.retry,
            &CancellationToken::new(),
            || {
                calls += 1;
                async { Err::<u64, _>(EngineError::Io(io::Error::from(io::ErrorKind::WouldBlock))) }
            },
        )
        .await;

        match result {
            Err(EngineError::Transfer { attempts, path, .. }) => {
                assert_eq!(attempts, options.retry.attempts);
                assert_eq!(path, PathBuf::from("locked.bin"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls, options.retry.attempts);
    }

    #[tokio::test]
    async fn test_missing_source_is_transfer_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let result = copy_file(
            &dir.path().join("missing"),
            &dir.path().join("dst"),
            &fast_options(),
            &CancellationToken::new(),
        )
        .await;

        match result {
            Err(EngineError::Transfer { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!dir.path().join("dst.part").exists());
        Ok(())
    }
}
