use workflow_core::audit::AuditLogger;
use workflow_core::config::EngineConfig;

use super::{EXIT_SUCCESS, EXIT_VALIDATION_ERROR, EXIT_WORKFLOW_FAILURE};

/// Audit files are named `{workflow}-{run_id}.audit.json`; a bare run id is
/// enough to find the log since run ids are UUIDs.
fn find_workflow_name(config: &EngineConfig, run_id: &str) -> Option<String> {
    let suffix = format!("-{run_id}.audit.json");
    let entries = std::fs::read_dir(&config.logs_dir).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(workflow_name) = file_name.strip_suffix(&suffix) {
            return Some(workflow_name.to_string());
        }
    }
    None
}

pub fn run(config: &EngineConfig, run_id: &str) -> i32 {
    let Some(workflow_name) = find_workflow_name(config, run_id) else {
        tracing::error!("no audit log found for run `{run_id}`");
        return EXIT_VALIDATION_ERROR;
    };

    let logger = match AuditLogger::load(config, &workflow_name, run_id, &[]) {
        Ok(logger) => logger,
        Err(e) => {
            tracing::error!("{e}");
            return EXIT_VALIDATION_ERROR;
        }
    };

    let summary = logger.get_summary();
    println!(
        "{} ({}): {} entries, integrity {}",
        summary.workflow_name,
        summary.run_id,
        summary.total_entries,
        if summary.integrity_valid { "OK" } else { "FAILED" }
    );
    println!(
        "  steps started={} completed={} failed={} skipped={}",
        summary.steps_started, summary.steps_completed, summary.steps_failed, summary.steps_skipped
    );
    println!(
        "  tool_calls={} permission_denials={} errors={} warnings={}",
        summary.tool_calls, summary.permission_denials, summary.errors, summary.warnings
    );

    if summary.integrity_valid {
        EXIT_SUCCESS
    } else {
        EXIT_WORKFLOW_FAILURE
    }
}
