//! Business software monitor.
//!
//! Polls the process table on a fixed interval and publishes whether any
//! configured process is running. Each active run attaches a listener that
//! pauses its task while the flag is set and resumes it once it clears.

use crate::control::TaskControl;
use crate::model::JobStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(target_os = "linux")]
use procfs::process::all_processes;

/// Source of running process names
pub trait ProcessProbe: Send + Sync + 'static {
    fn running_names(&self) -> std::io::Result<Vec<String>>;
}

/// Reads the operating system's process table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[cfg(target_os = "linux")]
impl ProcessProbe for SystemProbe {
    fn running_names(&self) -> std::io::Result<Vec<String>> {
        let processes = all_processes().map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(processes
            .filter_map(|p| p.ok())
            .filter_map(|p| p.stat().ok())
            .map(|stat| stat.comm)
            .collect())
    }
}

#[cfg(not(target_os = "linux"))]
impl ProcessProbe for SystemProbe {
    fn running_names(&self) -> std::io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Linux truncates process names to 15 bytes
const COMM_LEN: usize = 15;

fn normalize_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);
    name.chars().take(COMM_LEN).collect()
}

/// Case-insensitive name match, ignoring a `.exe` suffix
pub fn process_matches(configured: &str, running: &str) -> bool {
    let configured = normalize_name(configured);
    !configured.is_empty() && configured == normalize_name(running)
}

/// True when any of `names` is currently running
pub fn any_running(probe: &dyn ProcessProbe, names: &[String]) -> bool {
    if names.is_empty() {
        return false;
    }
    match probe.running_names() {
        Ok(running) => running
            .iter()
            .any(|r| names.iter().any(|n| process_matches(n, r))),
        Err(e) => {
            warn!("Failed to list processes: {}", e);
            false
        }
    }
}

/// Publishes the "business software running" flag
pub struct ProcessMonitor {
    tx: Arc<watch::Sender<bool>>,
    shutdown: CancellationToken,
}

impl ProcessMonitor {
    /// Start polling `probe` for `names` every `interval`.
    ///
    /// With no names configured the flag simply stays `false`.
    pub fn spawn(probe: Arc<dyn ProcessProbe>, names: Vec<String>, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        let tx = Arc::new(tx);
        let shutdown = CancellationToken::new();

        if !names.is_empty() {
            let tx = Arc::clone(&tx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.cancelled() => break,
                    }

                    let probe = Arc::clone(&probe);
                    let names = names.clone();
                    let running =
                        match tokio::task::spawn_blocking(move || any_running(probe.as_ref(), &names)).await {
                            Ok(running) => running,
                            Err(e) => {
                                warn!("Process probe task failed: {}", e);
                                continue;
                            }
                        };

                    let changed = tx.send_if_modified(|current| {
                        if *current != running {
                            *current = running;
                            true
                        } else {
                            false
                        }
                    });
                    if changed {
                        if running {
                            info!("Business software detected, pausing backups");
                        } else {
                            info!("Business software closed, resuming backups");
                        }
                    }
                }
                debug!("Process monitor stopped");
            });
        }

        Self { tx, shutdown }
    }

    /// A monitor that never reports business software
    pub fn disabled() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_blocking(&self) -> bool {
        *self.tx.borrow()
    }

    /// Bind a run to the monitor until the returned handle is aborted.
    ///
    /// The current flag is applied immediately, then every change.
    pub fn attach(&self, task: Arc<TaskControl>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                let blocking = *rx.borrow_and_update();
                apply(&task, blocking);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    #[cfg(test)]
    fn set(&self, running: bool) {
        self.tx.send_replace(running);
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn apply(task: &TaskControl, blocking: bool) {
    let result = match (blocking, task.phase()) {
        (true, JobStatus::Running) => task.pause(),
        (false, JobStatus::Paused) => task.resume(),
        _ => Ok(()),
    };
    if let Err(e) = result {
        debug!(job = %task.job_name(), "Monitor transition skipped: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeProbe {
        names: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        fn new(names: &[&str]) -> Self {
            Self {
                names: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
            }
        }

        fn set(&self, names: &[&str]) {
            *self.names.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
        }
    }

    impl ProcessProbe for FakeProbe {
        fn running_names(&self) -> std::io::Result<Vec<String>> {
            Ok(self.names.lock().unwrap().clone())
        }
    }

    #[test]
    fn test_process_matching() {
        assert!(process_matches("notepad", "notepad"));
        assert!(process_matches("Excel", "EXCEL.EXE"));
        assert!(process_matches("libreoffice-writer", "libreoffice-wri"));
        assert!(!process_matches("word", "wordpad"));
        assert!(!process_matches("", ""));
    }

    #[test]
    fn test_any_running() {
        let probe = FakeProbe::new(&["bash", "WINWORD.exe"]);
        assert!(any_running(&probe, &["winword".to_string()]));
        assert!(!any_running(&probe, &["excel".to_string()]));
        assert!(!any_running(&probe, &[]));
    }

    #[tokio::test]
    async fn test_polling_publishes_changes() {
        let probe = Arc::new(FakeProbe::new(&[]));
        let monitor = ProcessMonitor::spawn(
            probe.clone(),
            vec!["calc".to_string()],
            Duration::from_millis(10),
        );
        let mut rx = monitor.subscribe();

        probe.set(&["calc"]);
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| *v))
            .await
            .unwrap()
            .unwrap();
        assert!(monitor.is_blocking());

        probe.set(&[]);
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| !*v))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_attach_pauses_and_resumes() {
        let monitor = ProcessMonitor::disabled();
        let task = Arc::new(TaskControl::new("docs"));
        task.start().unwrap();

        monitor.set(true);
        let listener = monitor.attach(Arc::clone(&task));
        let mut phase = task.subscribe();

        tokio::time::timeout(
            Duration::from_secs(2),
            phase.wait_for(|p| *p == JobStatus::Paused),
        )
        .await
        .unwrap()
        .unwrap();

        monitor.set(false);
        tokio::time::timeout(
            Duration::from_secs(2),
            phase.wait_for(|p| *p == JobStatus::Running),
        )
        .await
        .unwrap()
        .unwrap();

        listener.abort();
    }
}
