//! WebSocket command handlers.
//!
//! Commands address running tasks by job name through the service's
//! task registry.

use super::{WsCommand, WsEvent};
use crate::service::BackupService;
use crate::utils::errors::Result;
use tracing::info;

/// Handle a command and build the reply sent back to the client
pub async fn handle_command(service: &BackupService, command: WsCommand) -> WsEvent {
    match command {
        WsCommand::PauseBackup { job } => {
            info!("Received pause command for job: {}", job);
            let result = service.pause(&job).await;
            reply(job, "pause", result)
        }
        WsCommand::ResumeBackup { job } => {
            info!("Received resume command for job: {}", job);
            let result = service.resume(&job).await;
            reply(job, "resume", result)
        }
        WsCommand::StopBackup { job } => {
            info!("Received stop command for job: {}", job);
            let result = service.stop(&job).await;
            reply(job, "stop", result)
        }
        WsCommand::GetStates => WsEvent::States(service.states()),
    }
}

fn reply(job: String, action: &str, result: Result<()>) -> WsEvent {
    WsEvent::CommandResult {
        job,
        action: action.to_string(),
        ok: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::TaskControl;
    use crate::executor::{BackupExecutor, ExecutorSettings};
    use crate::model::JobStatus;
    use crate::store::{MemoryAuditLog, MemoryStateStore};
    use std::sync::Arc;

    fn service() -> BackupService {
        let executor = BackupExecutor::new(
            ExecutorSettings::default(),
            Arc::new(MemoryAuditLog::new()),
        );
        BackupService::new(executor, Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn test_pause_and_stop_registered_task() {
        let service = service();
        let task = Arc::new(TaskControl::new("docs"));
        task.start().unwrap();
        service.registry().register(Arc::clone(&task)).await;

        let event = handle_command(
            &service,
            WsCommand::PauseBackup {
                job: "docs".to_string(),
            },
        )
        .await;
        assert!(matches!(event, WsEvent::CommandResult { ok: true, .. }));
        assert_eq!(task.phase(), JobStatus::Paused);

        handle_command(
            &service,
            WsCommand::StopBackup {
                job: "docs".to_string(),
            },
        )
        .await;
        assert_eq!(task.phase(), JobStatus::Stopped);
        assert!(task.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_job_reports_error() {
        let event = handle_command(
            &service(),
            WsCommand::ResumeBackup {
                job: "missing".to_string(),
            },
        )
        .await;

        match event {
            WsEvent::CommandResult { ok, error, .. } => {
                assert!(!ok);
                assert!(error.unwrap().contains("missing"));
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_get_states() {
        let event = handle_command(&service(), WsCommand::GetStates).await;
        assert!(matches!(event, WsEvent::States(states) if states.is_empty()));
    }
}
