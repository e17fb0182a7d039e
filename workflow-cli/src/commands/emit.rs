use std::collections::BTreeMap;

use workflow_core::config::EngineConfig;
use workflow_core::triggers::emit_event_file;
use workflow_kernel::value::Value;

use super::{EXIT_SUCCESS, EXIT_VALIDATION_ERROR};

/// Writes the event to disk for the daemon's event bus to pick up on its next
/// poll, rather than delivering it in-process — an `emit` invocation and the
/// running daemon are always separate processes.
pub fn run(config: &EngineConfig, event_name: &str, data: BTreeMap<String, Value>) -> i32 {
    match emit_event_file(config, event_name, data) {
        Ok(()) => {
            println!("emitted `{event_name}`");
            EXIT_SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            EXIT_VALIDATION_ERROR
        }
    }
}
