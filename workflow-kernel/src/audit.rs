//! Hash-chained, append-only audit entries. This module owns the pure
//! hashing/verification logic; `workflow-core`'s auditor owns the actual log
//! file and calls into `append_entry`/`verify_chain` for every event.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    WorkflowStart,
    WorkflowComplete,
    WorkflowFailed,
    WorkflowPaused,
    WorkflowResumed,
    StepStart,
    StepComplete,
    StepFailed,
    StepSkipped,
    ToolCall,
    ToolResult,
    PermissionCheck,
    PermissionDenied,
    PermissionGranted,
    BudgetUpdate,
    BudgetWarning,
    BudgetExceeded,
    CheckpointCreated,
    CheckpointRestored,
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub workflow_name: String,
    pub run_id: String,
    #[serde(default)]
    pub step_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// The canonical JSON over which an entry's hash is computed. Only the
/// fields named in this struct participate in the hash; `workflow_name`,
/// `run_id`, and `step_name` deliberately do not, mirroring the original
/// logger's chain content.
#[derive(Serialize)]
struct HashedFields<'a> {
    timestamp: &'a DateTime<Utc>,
    event_type: AuditEventType,
    message: &'a str,
    data: &'a Option<Value>,
    previous_hash: &'a Option<String>,
}

/// `own_hash = sha256(canonical_json(timestamp, event_type, message, data, previous_hash))[:16 hex]`.
/// Field order in the struct above is fixed and `serde_json` does not
/// reorder struct fields, so this is already canonical without a separate
/// sort-keys pass.
pub fn compute_hash(
    timestamp: &DateTime<Utc>,
    event_type: AuditEventType,
    message: &str,
    data: &Option<Value>,
    previous_hash: &Option<String>,
) -> String {
    let fields = HashedFields {
        timestamp,
        event_type,
        message,
        data,
        previous_hash,
    };
    let canonical = serde_json::to_string(&fields).expect("audit fields always serialize");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

pub fn append_entry(
    chain: &mut Vec<AuditEntry>,
    workflow_name: impl Into<String>,
    run_id: impl Into<String>,
    event_type: AuditEventType,
    message: impl Into<String>,
    step_name: Option<String>,
    data: Option<Value>,
) -> AuditEntry {
    let timestamp = Utc::now();
    let message = message.into();
    let previous_hash = chain.last().map(|e| e.entry_hash.clone());
    let entry_hash = compute_hash(&timestamp, event_type, &message, &data, &previous_hash);

    let entry = AuditEntry {
        timestamp,
        event_type,
        workflow_name: workflow_name.into(),
        run_id: run_id.into(),
        step_name,
        message,
        data,
        previous_hash,
        entry_hash,
    };
    chain.push(entry.clone());
    entry
}

/// Recompute every hash in the chain and confirm both the per-entry hash and
/// the previous-hash linkage hold. Returns on the first broken link.
pub fn verify_chain(chain: &[AuditEntry]) -> bool {
    let mut expected_previous: Option<String> = None;
    for entry in chain {
        if entry.previous_hash != expected_previous {
            return false;
        }
        let recomputed = compute_hash(
            &entry.timestamp,
            entry.event_type,
            &entry.message,
            &entry.data,
            &entry.previous_hash,
        );
        if recomputed != entry.entry_hash {
            return false;
        }
        expected_previous = Some(entry.entry_hash.clone());
    }
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditSummary {
    pub workflow_name: String,
    pub run_id: String,
    pub total_entries: usize,
    pub steps_started: usize,
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub tool_calls: usize,
    pub permission_denials: usize,
    pub errors: usize,
    pub warnings: usize,
    pub integrity_valid: bool,
}

pub fn summarize(workflow_name: &str, run_id: &str, chain: &[AuditEntry]) -> AuditSummary {
    let count = |t: AuditEventType| chain.iter().filter(|e| e.event_type == t).count();
    AuditSummary {
        workflow_name: workflow_name.to_string(),
        run_id: run_id.to_string(),
        total_entries: chain.len(),
        steps_started: count(AuditEventType::StepStart),
        steps_completed: count(AuditEventType::StepComplete),
        steps_failed: count(AuditEventType::StepFailed),
        steps_skipped: count(AuditEventType::StepSkipped),
        tool_calls: count(AuditEventType::ToolCall),
        permission_denials: count(AuditEventType::PermissionDenied),
        errors: count(AuditEventType::Error),
        warnings: count(AuditEventType::Warning),
        integrity_valid: verify_chain(chain),
    }
}

/// Redact keys whose name matches one of `patterns` (case-insensitive glob,
/// e.g. `*_KEY`, `*_SECRET`, `*_TOKEN`, `*PASSWORD*`). Nested maps recurse.
pub fn redact_fields(value: &Value, patterns: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, v) in map {
                if patterns
                    .iter()
                    .any(|p| glob::Pattern::new(&p.to_uppercase())
                        .map(|pat| pat.matches(&key.to_uppercase()))
                        .unwrap_or(false))
                {
                    redacted.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key.clone(), redact_fields(v, patterns));
                }
            }
            Value::Object(redacted)
        }
        other => other.clone(),
    }
}

pub fn default_redact_patterns() -> Vec<String> {
    vec![
        "*_KEY".to_string(),
        "*_SECRET".to_string(),
        "*_TOKEN".to_string(),
        "*PASSWORD*".to_string(),
    ]
}

/// Truncate long string outputs before they enter the audit log, matching
/// the original logger's 10_000-character cap.
pub fn truncate_output(value: Value) -> Value {
    const LIMIT: usize = 10_000;
    match value {
        Value::String(s) if s.len() > LIMIT => {
            Value::String(format!("{}... [truncated]", &s[..LIMIT]))
        }
        other => other,
    }
}

pub type DataMap = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_and_verifies() {
        let mut chain = Vec::new();
        append_entry(
            &mut chain,
            "wf",
            "run-1",
            AuditEventType::WorkflowStart,
            "started",
            None,
            None,
        );
        append_entry(
            &mut chain,
            "wf",
            "run-1",
            AuditEventType::StepStart,
            "step one",
            Some("step-1".to_string()),
            None,
        );
        assert!(verify_chain(&chain));
        assert_eq!(chain[1].previous_hash.as_deref(), Some(chain[0].entry_hash.as_str()));
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut chain = Vec::new();
        append_entry(
            &mut chain,
            "wf",
            "run-1",
            AuditEventType::WorkflowStart,
            "started",
            None,
            None,
        );
        chain[0].message = "tampered".to_string();
        assert!(!verify_chain(&chain));
    }

    #[test]
    fn redact_fields_matches_case_insensitive_glob() {
        let value = serde_json::json!({"API_KEY": "abc", "name": "ok"});
        let redacted = redact_fields(&value, &default_redact_patterns());
        assert_eq!(redacted["API_KEY"], serde_json::json!("[REDACTED]"));
        assert_eq!(redacted["name"], serde_json::json!("ok"));
    }

    #[test]
    fn summary_counts_events_by_type() {
        let mut chain = Vec::new();
        append_entry(&mut chain, "wf", "r", AuditEventType::StepStart, "s1", Some("a".into()), None);
        append_entry(&mut chain, "wf", "r", AuditEventType::StepComplete, "s1 done", Some("a".into()), None);
        append_entry(&mut chain, "wf", "r", AuditEventType::StepFailed, "s2 failed", Some("b".into()), None);
        let summary = summarize("wf", "r", &chain);
        assert_eq!(summary.steps_started, 1);
        assert_eq!(summary.steps_completed, 1);
        assert_eq!(summary.steps_failed, 1);
        assert!(summary.integrity_valid);
    }
}
