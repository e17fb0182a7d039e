use std::collections::BTreeMap;
use tempfile::TempDir;
use workflow_core::triggers::{drain_event_files, emit_event_file};
use workflow_kernel::value::Value;

use crate::fixtures::test_config;

/// `emit` writes a file the daemon drains on its next poll; draining removes
/// the files so the same event isn't replayed.
#[test]
fn emitted_events_are_drained_once_in_order() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);

    let mut first = BTreeMap::new();
    first.insert("branch".to_string(), Value::String("main".to_string()));
    emit_event_file(&config, "deploy.completed", first).unwrap();

    let mut second = BTreeMap::new();
    second.insert("branch".to_string(), Value::String("staging".to_string()));
    emit_event_file(&config, "deploy.completed", second).unwrap();

    let drained = drain_event_files(&config).unwrap();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].0, "deploy.completed");

    let again = drain_event_files(&config).unwrap();
    assert!(again.is_empty());
}
