//! Encryption handoff to an external encryptor process.
//!
//! Requests are queued to a single worker so at most one encryptor runs at
//! a time. The worker encrypts a temp copy of the file, checks the copy
//! actually changed and only then renames it over the original. The
//! encryptor is invoked as `<executable> <absolute-file-path> <key>` and
//! reports through its exit code: -99 is a failure, any non-negative code
//! is success, everything else is treated as a failure too.

use crate::config::EncryptionConfig;
use crate::fs::ExtensionSet;
use crate::model::BackupJob;
use crate::monitor::{any_running, ProcessProbe};
use crate::utils::errors::{EngineError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const TEMP_SUFFIX: &str = ".temp_for_encryption";
const QUEUE_CAPACITY: usize = 64;
const FAILURE_CODE: i32 = -99;

/// Which files get encrypted, and with which key
#[derive(Debug, Clone, Default)]
pub struct EncryptionPolicy {
    pub enabled: bool,
    pub extensions: ExtensionSet,
    pub default_key: Option<String>,
}

impl EncryptionPolicy {
    pub fn from_config(config: &EncryptionConfig) -> Self {
        Self {
            enabled: config.enabled,
            extensions: ExtensionSet::new(&config.extensions),
            default_key: config.key.clone(),
        }
    }

    /// Enabled globally or for the job, and the extension is listed
    pub fn is_eligible(&self, job: &BackupJob, path: &Path) -> bool {
        (self.enabled || job.encryption_enabled) && self.extensions.matches(path)
    }

    /// The job's own key, else the configured default
    pub fn key_for(&self, job: &BackupJob) -> Result<String> {
        job.encryption_key
            .as_ref()
            .or(self.default_key.as_ref())
            .filter(|key| !key.is_empty())
            .cloned()
            .ok_or_else(|| {
                EngineError::Encryption(format!("no encryption key configured for '{}'", job.name))
            })
    }
}

/// How the encryptor process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptorExit {
    /// Non-negative code, advisory elapsed milliseconds
    Success(i64),
    /// Explicit -99
    Failed,
    /// Negative code other than -99
    Ambiguous(i32),
    /// Terminated by a signal
    Killed,
}

/// Map a raw exit code to its meaning.
///
/// Unix exit statuses are a single byte: -99 arrives as 157 and -1 as 255.
/// Only those two are mapped back; every other status is taken as the
/// non-negative elapsed time it reports, 128..=254 included.
pub fn interpret_exit(code: Option<i32>) -> EncryptorExit {
    let Some(code) = code else {
        return EncryptorExit::Killed;
    };

    #[cfg(unix)]
    let code = match code {
        157 => FAILURE_CODE,
        255 => -1,
        c => c,
    };

    match code {
        FAILURE_CODE => EncryptorExit::Failed,
        c if c >= 0 => EncryptorExit::Success(i64::from(c)),
        c => EncryptorExit::Ambiguous(c),
    }
}

/// Sibling working copy used while encrypting `file`
pub fn temp_path(file: &Path) -> PathBuf {
    let mut name: OsString = file.file_name().map(OsString::from).unwrap_or_default();
    name.push(TEMP_SUFFIX);
    file.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct EncryptorSettings {
    pub executable: PathBuf,
    pub timeout: Duration,
    /// Bound on waiting for a foreign encryptor instance to exit
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

impl EncryptorSettings {
    pub fn from_config(config: &EncryptionConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            poll_interval: Duration::from_millis(500),
        }
    }

    fn process_name(&self) -> Option<String> {
        self.executable
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncryptionOutcome {
    pub elapsed: Duration,
    /// Milliseconds reported by the encryptor itself, when it printed any
    pub reported_ms: Option<i64>,
}

impl EncryptionOutcome {
    pub fn elapsed_ms(&self) -> i64 {
        self.reported_ms
            .unwrap_or_else(|| self.elapsed.as_millis() as i64)
    }
}

struct EncryptionRequest {
    file: PathBuf,
    key: String,
    done: oneshot::Sender<Result<EncryptionOutcome>>,
}

/// Serialized front-end to the external encryptor
#[derive(Clone)]
pub struct EncryptionService {
    tx: mpsc::Sender<EncryptionRequest>,
}

impl EncryptionService {
    /// Start the single worker that drains the request queue
    pub fn spawn(settings: EncryptorSettings, probe: Arc<dyn ProcessProbe>) -> Self {
        let (tx, mut rx) = mpsc::channel::<EncryptionRequest>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = encrypt_in_place(&settings, &probe, &request.file, &request.key).await;
                if let Err(e) = &result {
                    warn!("Encryption of {} failed: {}", request.file.display(), e);
                }
                // The caller may have gone away
                let _ = request.done.send(result);
            }
            debug!("Encryption worker stopped");
        });

        Self { tx }
    }

    /// Encrypt `file` in place, waiting for every request queued before it
    pub async fn encrypt_file(&self, file: &Path, key: &str) -> Result<EncryptionOutcome> {
        let (done, rx) = oneshot::channel();
        let request = EncryptionRequest {
            file: file.to_path_buf(),
            key: key.to_string(),
            done,
        };

        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::Encryption("encryption worker is not running".into()))?;
        rx.await
            .map_err(|_| EngineError::Encryption("encryption worker dropped the request".into()))?
    }

    /// Encrypt a scratch file, check it changed, encrypt again and check
    /// the original bytes came back.
    pub async fn self_test(&self, key: &str) -> Result<()> {
        const SAMPLE: &[u8] = b"backup engine encryption self-test\n";

        let scratch = std::env::temp_dir().join(format!(
            "backup-engine-selftest-{}.txt",
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&scratch, SAMPLE).await?;

        let result = async {
            self.encrypt_file(&scratch, key).await?;
            if tokio::fs::read(&scratch).await? == SAMPLE {
                return Err(EngineError::Encryption("self-test output unchanged".into()));
            }
            self.encrypt_file(&scratch, key).await?;
            if tokio::fs::read(&scratch).await? != SAMPLE {
                return Err(EngineError::Encryption(
                    "self-test did not restore the original content".into(),
                ));
            }
            Ok::<(), EngineError>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&scratch).await;
        if result.is_ok() {
            info!("Encryption self-test passed");
        }
        result
    }
}

async fn encrypt_in_place(
    settings: &EncryptorSettings,
    probe: &Arc<dyn ProcessProbe>,
    file: &Path,
    key: &str,
) -> Result<EncryptionOutcome> {
    let temp = temp_path(file);
    let result = encrypt_via_temp(settings, probe, file, &temp, key).await;

    if let Err(e) = tokio::fs::remove_file(&temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", temp.display(), e);
        }
    }

    result
}

async fn encrypt_via_temp(
    settings: &EncryptorSettings,
    probe: &Arc<dyn ProcessProbe>,
    file: &Path,
    temp: &Path,
    key: &str,
) -> Result<EncryptionOutcome> {
    tokio::fs::copy(file, temp).await?;

    let outcome = run_encryptor(settings, probe, temp, key).await?;

    if files_identical(file, temp).await? {
        return Err(EngineError::Encryption(format!(
            "encryptor left {} unchanged",
            file.display()
        )));
    }

    tokio::fs::rename(temp, file).await?;
    debug!("Encrypted {} in {}ms", file.display(), outcome.elapsed_ms());
    Ok(outcome)
}

async fn wait_for_free_encryptor(
    settings: &EncryptorSettings,
    probe: &Arc<dyn ProcessProbe>,
) -> Result<()> {
    let Some(name) = settings.process_name() else {
        return Ok(());
    };
    let names = vec![name];
    let deadline = Instant::now() + settings.wait_timeout;

    loop {
        let probe = Arc::clone(probe);
        let check = names.clone();
        let busy = tokio::task::spawn_blocking(move || any_running(probe.as_ref(), &check))
            .await
            .unwrap_or(false);
        if !busy {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(EngineError::Encryption(format!(
                "another {} instance is still running after {}s",
                names[0],
                settings.wait_timeout.as_secs()
            )));
        }
        debug!("Waiting for running {} instance to exit", names[0]);
        tokio::time::sleep(settings.poll_interval).await;
    }
}

async fn run_encryptor(
    settings: &EncryptorSettings,
    probe: &Arc<dyn ProcessProbe>,
    target: &Path,
    key: &str,
) -> Result<EncryptionOutcome> {
    wait_for_free_encryptor(settings, probe).await?;

    let absolute = tokio::fs::canonicalize(target).await?;
    let start = Instant::now();

    let child = Command::new(&settings.executable)
        .arg(&absolute)
        .arg(key)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // Dropping the future on timeout kills the child
    let output = match tokio::time::timeout(settings.timeout, child).await {
        Ok(output) => output.map_err(|e| {
            EngineError::Encryption(format!(
                "failed to start {}: {}",
                settings.executable.display(),
                e
            ))
        })?,
        Err(_) => return Err(EngineError::EncryptionTimeout(settings.timeout.as_secs())),
    };
    let elapsed = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!("Encryptor stderr: {}", stderr.trim());
    }

    match interpret_exit(output.status.code()) {
        EncryptorExit::Success(code) => Ok(EncryptionOutcome {
            elapsed,
            reported_ms: stdout.trim().parse::<i64>().ok().or(Some(code).filter(|c| *c > 0)),
        }),
        EncryptorExit::Failed => Err(EngineError::Encryption(format!(
            "encryptor reported failure: {}",
            stderr.trim()
        ))),
        EncryptorExit::Ambiguous(code) => Err(EngineError::Encryption(format!(
            "encryptor exited with unexpected code {}",
            code
        ))),
        EncryptorExit::Killed => Err(EngineError::Encryption(
            "encryptor terminated by a signal".into(),
        )),
    }
}

/// Byte-wise comparison, streamed
async fn files_identical(a: &Path, b: &Path) -> std::io::Result<bool> {
    let mut fa = tokio::fs::File::open(a).await?;
    let mut fb = tokio::fs::File::open(b).await?;
    if fa.metadata().await?.len() != fb.metadata().await?.len() {
        return Ok(false);
    }

    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];
    loop {
        let n = fa.read(&mut buf_a).await?;
        if n == 0 {
            return Ok(true);
        }
        fb.read_exact(&mut buf_b[..n]).await?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}
