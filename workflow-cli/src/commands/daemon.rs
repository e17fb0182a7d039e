use workflow_core::config::EngineConfig;
use workflow_core::executor::LocalShell;
use workflow_core::llm::CliLlm;
use workflow_core::triggers::{daemon_is_running, daemon_status, WorkflowDaemon};

use super::{EXIT_DAEMON_NOT_RUNNING, EXIT_SUCCESS, EXIT_VALIDATION_ERROR};

/// Runs the trigger daemon in the foreground until ctrl-c. A process
/// supervisor (systemd, docker, etc.) is expected to own backgrounding and
/// restart policy, matching the teacher's own daemon commands, which never
/// fork themselves.
pub async fn start(config: &EngineConfig, llm_command: &[String]) -> i32 {
    if daemon_is_running(config) {
        tracing::error!("daemon already running per {}", config.daemon_status_file.display());
        return EXIT_VALIDATION_ERROR;
    }

    let shell = LocalShell;
    let llm = CliLlm::new(llm_command.to_vec());
    let daemon = WorkflowDaemon::new(config, &shell, &llm);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = tx.send(());
    });

    let result = daemon.run(rx).await;
    ctrl_c.abort();
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            tracing::error!("daemon exited with an error: {e}");
            EXIT_VALIDATION_ERROR
        }
    }
}

/// There is no long-lived supervisor process to signal here: the daemon is
/// meant to be stopped the way it was started, via ctrl-c or the owning
/// supervisor. This just reports whether a stale status file should be
/// cleaned up.
pub fn stop(config: &EngineConfig) -> i32 {
    if !daemon_is_running(config) {
        println!("daemon is not running");
        return EXIT_DAEMON_NOT_RUNNING;
    }
    println!(
        "daemon status reports running; send the owning process (see {}) a SIGINT or SIGTERM",
        config.daemon_pid_file.display()
    );
    EXIT_SUCCESS
}

pub fn status(config: &EngineConfig) -> i32 {
    match daemon_status(config) {
        Ok(Some(status)) => {
            println!(
                "{}: {} cron job(s), {} watch(es), {} subscription(s) as of {}",
                status.status, status.cron_jobs, status.file_watches, status.event_subscriptions, status.timestamp
            );
            if status.status == "running" {
                EXIT_SUCCESS
            } else {
                EXIT_DAEMON_NOT_RUNNING
            }
        }
        Ok(None) => {
            println!("daemon is not running");
            EXIT_DAEMON_NOT_RUNNING
        }
        Err(e) => {
            tracing::error!("{e}");
            EXIT_VALIDATION_ERROR
        }
    }
}
