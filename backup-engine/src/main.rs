//! Backup Engine - Main entry point
//!
//! Manages backup job definitions and runs them.

use anyhow::{bail, Context, Result};
use backup_engine::{
    api,
    config::{AuditFormat, Config},
    crypto::{EncryptionService, EncryptorSettings},
    daemon::shutdown::ShutdownCoordinator,
    model::{BackupJob, BackupType, RunStatus},
    monitor::SystemProbe,
    reporter::{ProgressCallback, ProgressReport},
    store::{JobRepository, JsonStateStore, StateStore},
    utils, BackupService,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Audit file format, overriding the configured one
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List backup jobs
    List,

    /// Add a backup job
    Add {
        name: String,
        source: PathBuf,
        target: PathBuf,

        #[arg(long = "type", value_enum, default_value_t = JobKind::Full)]
        kind: JobKind,

        /// Encrypt eligible files of this job even if encryption is off globally
        #[arg(long)]
        encrypt: bool,

        /// Encryption key for this job
        #[arg(long)]
        key: Option<String>,
    },

    /// Remove a backup job by id
    Remove { id: u32 },

    /// Run backup jobs one after another (all jobs when none are given)
    Run {
        #[arg(short, long = "job", value_name = "ID")]
        jobs: Vec<u32>,

        /// Serve the remote monitor on this port during the run
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the last known state of every job
    State,

    /// Check that the configured encryptor round-trips a scratch file
    SelfTest {
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Xml,
}

impl From<LogFormat> for AuditFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => AuditFormat::Json,
            LogFormat::Xml => AuditFormat::Xml,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum JobKind {
    Full,
    Differential,
}

impl From<JobKind> for BackupType {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Full => BackupType::Full,
            JobKind::Differential => BackupType::Differential,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };
    if let Some(format) = args.log_format {
        config.log.format = format.into();
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    match args.command {
        Command::List => list_jobs(&config).await,
        Command::Add {
            name,
            source,
            target,
            kind,
            encrypt,
            key,
        } => {
            let repository = JobRepository::open(&config.state.jobs_path).await?;
            let mut job = BackupJob::new(name, source, target, kind.into());
            job.encryption_enabled = encrypt;
            job.encryption_key = key;
            let job = repository.add(job).await?;
            println!("Added job {} ({})", job.id, job.name);
            Ok(())
        }
        Command::Remove { id } => {
            let repository = JobRepository::open(&config.state.jobs_path).await?;
            let job = repository.remove(id).await?;
            println!("Removed job {} ({})", job.id, job.name);
            Ok(())
        }
        Command::Run { jobs, port } => run_jobs(&config, jobs, port).await,
        Command::State => {
            let store = JsonStateStore::open(&config.state.path)?;
            println!("{}", serde_json::to_string_pretty(&store.all())?);
            Ok(())
        }
        Command::SelfTest { key } => {
            let Some(key) = key.or_else(|| config.encryption.key.clone()) else {
                bail!("No encryption key given and none configured");
            };
            let service = EncryptionService::spawn(
                EncryptorSettings::from_config(&config.encryption),
                Arc::new(SystemProbe),
            );
            service.self_test(&key).await?;
            println!(
                "Encryptor {} passed the self-test",
                config.encryption.executable.display()
            );
            Ok(())
        }
    }
}

async fn list_jobs(config: &Config) -> Result<()> {
    let repository = JobRepository::open(&config.state.jobs_path).await?;
    let jobs = repository.list().await;
    if jobs.is_empty() {
        println!("No backup jobs configured");
        return Ok(());
    }

    for job in jobs {
        let last_run = job
            .last_run
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>3}  {:<20} {:<12} {} -> {}  last run: {}  status: {}",
            job.id,
            job.name,
            format!("{:?}", job.backup_type),
            job.source.display(),
            job.target.display(),
            last_run,
            job.status,
        );
    }
    Ok(())
}

async fn run_jobs(config: &Config, ids: Vec<u32>, port: Option<u16>) -> Result<()> {
    let service = Arc::new(BackupService::from_config(config).await?);
    let Some(repository) = service.repository().cloned() else {
        bail!("No job repository available");
    };

    let jobs = if ids.is_empty() {
        repository.list().await
    } else {
        let mut selected = Vec::with_capacity(ids.len());
        for id in ids {
            match repository.get(id).await {
                Some(job) => selected.push(job),
                None => bail!("Backup job {} not found", id),
            }
        }
        selected
    };
    if jobs.is_empty() {
        println!("No backup jobs to run");
        return Ok(());
    }

    let shutdown = ShutdownCoordinator::new();

    let remote = if config.remote.enabled || port.is_some() {
        api::health::init_start_time();
        let state = api::AppState::new(Arc::clone(&service));
        let port = port.unwrap_or(config.remote.port);
        let token = shutdown.token();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(state, port, token).await {
                tracing::error!("Remote monitor failed: {}", e);
            }
        }))
    } else {
        None
    };

    let signal_service = Arc::clone(&service);
    let signal_shutdown = shutdown.clone();
    let signals = tokio::spawn(async move {
        if signal_shutdown.wait_for_signal().await {
            signal_service.shutdown().await;
        }
    });

    let reports = service.run_jobs(jobs, Some(console_progress())).await;

    shutdown.trigger();
    let _ = signals.await;
    if let Some(remote) = remote {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), remote).await;
    }

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Ok(outcome) if outcome.status == RunStatus::Completed => {
                println!("{}: {}", report.job.name, outcome.summary);
            }
            Ok(outcome) => {
                println!("{}: {:?}", report.job.name, outcome.status);
            }
            Err(e) => {
                failed += 1;
                println!("{}: failed: {}", report.job.name, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} backup job(s) failed", failed, reports.len());
    }
    Ok(())
}

/// Print a line whenever the overall percentage moves by a whole point
fn console_progress() -> ProgressCallback {
    let last = Arc::new(AtomicU64::new(u64::MAX));
    Arc::new(move |report: ProgressReport| {
        let whole = report.overall_percent.floor() as u64;
        if last.swap(whole, Ordering::Relaxed) != whole {
            println!(
                "[{:>3}%] {} {}/{} files",
                whole, report.job_name, report.files_processed, report.total_files
            );
        }
        tracing::debug!(
            job = %report.job_name,
            percent = report.job_percent,
            file = ?report.current_file,
            "progress"
        );
    })
}
