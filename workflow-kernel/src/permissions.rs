//! Permission profile inheritance and the tool-check decision function.
//!
//! `evaluate_tool_check` is a pure `Facts -> Decision` function in the same
//! shape as a scheduler's job-evaluation step: all the inputs the decision
//! depends on are gathered into one struct up front, so the decision itself
//! is a plain match with no side effects and is trivial to unit test.

use crate::error::WorkflowError;
use crate::model::{CommandAccessPolicy, FileAccessPolicy, PermissionsProfile, ResourceLimits, ToolConstraint};
use std::collections::{HashMap, HashSet};

/// Merge a profile with its ancestor chain, detecting cycles. Lists (allow/ask/deny)
/// union together across the chain; scalars and non-empty path lists are
/// child-wins (the most-derived profile that sets a value takes precedence).
pub fn resolve_inheritance(
    name: &str,
    profiles: &HashMap<String, PermissionsProfile>,
) -> Result<PermissionsProfile, WorkflowError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = name.to_string();

    loop {
        if !seen.insert(current.clone()) {
            return Err(WorkflowError::CircularInheritance {
                name: name.to_string(),
                path: chain.join(" -> "),
            });
        }
        let profile = profiles
            .get(&current)
            .ok_or_else(|| WorkflowError::ProfileNotFound {
                name: current.clone(),
            })?;
        chain.push(current.clone());
        match &profile.inherits {
            Some(parent) => current = parent.clone(),
            None => break,
        }
    }

    // `chain` runs from most-derived to least-derived; fold root-to-leaf so
    // later (more-derived) merges win on scalars/path lists.
    let mut merged = profiles[chain.last().unwrap()].clone();
    for name in chain.iter().rev().skip(1) {
        let child = &profiles[name];
        merged = merge_profiles(&merged, child);
    }
    Ok(merged)
}

fn merge_profiles(parent: &PermissionsProfile, child: &PermissionsProfile) -> PermissionsProfile {
    let mut out = child.clone();
    out.inherits = None;

    out.tools.always_allow = union(&parent.tools.always_allow, &child.tools.always_allow);
    out.tools.ask_once = union(&parent.tools.ask_once, &child.tools.ask_once);
    out.tools.never_allow = union_never_allow(&parent.tools.never_allow, &child.tools.never_allow);
    out.tools.allow_with_constraints = union_constraints(
        &parent.tools.allow_with_constraints,
        &child.tools.allow_with_constraints,
    );

    out.file_access.readable = union(&parent.file_access.readable, &child.file_access.readable);
    out.file_access.writable = union(&parent.file_access.writable, &child.file_access.writable);
    out.file_access.protected =
        union(&parent.file_access.protected, &child.file_access.protected);

    out.command_access.allowed =
        union(&parent.command_access.allowed, &child.command_access.allowed);
    out.command_access.denied =
        union(&parent.command_access.denied, &child.command_access.denied);

    out.secrets.allowed_env_vars = union(
        &parent.secrets.allowed_env_vars,
        &child.secrets.allowed_env_vars,
    );
    out.secrets.never_log = union(&parent.secrets.never_log, &child.secrets.never_log);

    // Scalars / resource limits: child wins when it set a value, else inherit parent's.
    out.resource_limits.max_file_size = child
        .resource_limits
        .max_file_size
        .clone()
        .or_else(|| parent.resource_limits.max_file_size.clone());
    out.resource_limits.max_files_per_step = child
        .resource_limits
        .max_files_per_step
        .or(parent.resource_limits.max_files_per_step);
    out.resource_limits.max_tokens_per_step = child
        .resource_limits
        .max_tokens_per_step
        .or(parent.resource_limits.max_tokens_per_step);
    out.resource_limits.max_api_calls = child
        .resource_limits
        .max_api_calls
        .or(parent.resource_limits.max_api_calls);

    out
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn union_never_allow(
    a: &[crate::model::NeverAllowRule],
    b: &[crate::model::NeverAllowRule],
) -> Vec<crate::model::NeverAllowRule> {
    let mut out = a.to_vec();
    for rule in b {
        if !out.iter().any(|r| r.tool == rule.tool) {
            out.push(rule.clone());
        }
    }
    out
}

fn union_constraints(a: &[ToolConstraint], b: &[ToolConstraint]) -> Vec<ToolConstraint> {
    let mut out = a.to_vec();
    for c in b {
        if !out.iter().any(|existing| existing.tool == c.tool) {
            out.push(c.clone());
        }
    }
    out
}

/// Everything a tool-check decision needs, gathered up front.
#[derive(Debug, Clone)]
pub struct PermissionFacts<'a> {
    pub profile: &'a PermissionsProfile,
    pub tool: &'a str,
    pub target_path: Option<&'a str>,
    pub command: Option<&'a str>,
    pub previously_approved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    AllowConstrained { reason: String },
    Ask,
    Deny { reason: String },
}

/// Decision order: never_allow -> DENY; always_allow -> ALLOW;
/// allow_with_constraints -> CONSTRAINED/DENY; ask_once -> ALLOW if
/// previously approved else ASK; otherwise DENY (default-deny).
pub fn evaluate_tool_check(facts: &PermissionFacts<'_>) -> PermissionDecision {
    let profile = facts.profile;

    for rule in &profile.tools.never_allow {
        if rule.tool == facts.tool && rule_matches(rule, facts) {
            return PermissionDecision::Deny {
                reason: format!("tool `{}` is in never_allow", facts.tool),
            };
        }
    }

    if profile.tools.always_allow.iter().any(|t| t == facts.tool) {
        return PermissionDecision::Allow;
    }

    if let Some(constraint) = profile
        .tools
        .allow_with_constraints
        .iter()
        .find(|c| c.tool == facts.tool)
    {
        return evaluate_constraint(constraint, facts);
    }

    if profile.tools.ask_once.iter().any(|t| t == facts.tool) {
        return if facts.previously_approved {
            PermissionDecision::Allow
        } else {
            PermissionDecision::Ask
        };
    }

    PermissionDecision::Deny {
        reason: format!("tool `{}` has no matching policy (default-deny)", facts.tool),
    }
}

fn rule_matches(rule: &crate::model::NeverAllowRule, facts: &PermissionFacts<'_>) -> bool {
    if rule.patterns.is_empty() {
        return true;
    }
    let Some(path) = facts.target_path else {
        return false;
    };
    rule.patterns
        .iter()
        .any(|pattern| glob_match(pattern, path))
}

fn evaluate_constraint(
    constraint: &ToolConstraint,
    facts: &PermissionFacts<'_>,
) -> PermissionDecision {
    if !constraint.allowed_commands.is_empty() {
        let Some(command) = facts.command else {
            return PermissionDecision::Deny {
                reason: "no command supplied for constrained tool".to_string(),
            };
        };
        if !constraint
            .allowed_commands
            .iter()
            .any(|allowed| allowed == command)
        {
            return PermissionDecision::Deny {
                reason: format!("command `{command}` not in allowed_commands"),
            };
        }
    }

    if !constraint.allowed_paths.is_empty() {
        let Some(path) = facts.target_path else {
            return PermissionDecision::Deny {
                reason: "no path supplied for constrained tool".to_string(),
            };
        };
        if !constraint
            .allowed_paths
            .iter()
            .any(|allowed| glob_match(allowed, path))
        {
            return PermissionDecision::Deny {
                reason: format!("path `{path}` not within allowed_paths"),
            };
        }
    }

    if !constraint.allowed_patterns.is_empty() {
        let Some(command) = facts.command else {
            return PermissionDecision::Deny {
                reason: "no command supplied to match allowed_patterns".to_string(),
            };
        };
        if !constraint
            .allowed_patterns
            .iter()
            .any(|pattern| regex_match(pattern, command))
        {
            return PermissionDecision::Deny {
                reason: format!("command `{command}` matches no allowed_patterns"),
            };
        }
    }

    PermissionDecision::AllowConstrained {
        reason: format!("tool `{}` allowed under constraints", constraint.tool),
    }
}

/// Path decision order: protected globs deny unconditionally, then the
/// readable allowlist; a path matching neither is denied.
pub fn check_file_read(policy: &FileAccessPolicy, path: &str) -> PermissionDecision {
    if let Some(pattern) = policy.protected.iter().find(|p| glob_match(p, path)) {
        return PermissionDecision::Deny {
            reason: format!("path `{path}` matches protected pattern `{pattern}`"),
        };
    }
    if policy.readable.iter().any(|p| glob_match(p, path)) {
        return PermissionDecision::Allow;
    }
    PermissionDecision::Deny {
        reason: format!("path `{path}` is not in readable patterns"),
    }
}

/// Same order as `check_file_read`, against the writable allowlist instead.
pub fn check_file_write(policy: &FileAccessPolicy, path: &str) -> PermissionDecision {
    if let Some(pattern) = policy.protected.iter().find(|p| glob_match(p, path)) {
        return PermissionDecision::Deny {
            reason: format!("path `{path}` matches protected pattern `{pattern}`"),
        };
    }
    if policy.writable.iter().any(|p| glob_match(p, path)) {
        return PermissionDecision::Allow;
    }
    PermissionDecision::Deny {
        reason: format!("path `{path}` is not in writable patterns"),
    }
}

/// Denied patterns win over allowed patterns; an empty `allowed` list means
/// unrestricted (subject only to `denied`), matching the original engine.
pub fn check_command(policy: &CommandAccessPolicy, command: &str) -> PermissionDecision {
    if let Some(pattern) = policy.denied.iter().find(|p| regex_match(p, command)) {
        return PermissionDecision::Deny {
            reason: format!("command `{command}` matches denied pattern `{pattern}`"),
        };
    }
    if policy.allowed.is_empty() || policy.allowed.iter().any(|p| regex_match(p, command)) {
        return PermissionDecision::Allow;
    }
    PermissionDecision::Deny {
        reason: format!("command `{command}` matches no allowed pattern"),
    }
}

/// Per-step resource accounting: tokens spent, API calls made, files
/// written. Reset at the start of every step, matching `max_*_per_step`
/// limits rather than a whole-run total (the run-level token/cost budget is
/// `workflow_kernel::context::WorkflowContext`'s concern).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub tokens: u64,
    pub api_calls: u32,
    pub files_modified: u32,
}

pub fn update_usage(usage: &mut ResourceUsage, tokens: u64, api_calls: u32, files_modified: u32) {
    usage.tokens += tokens;
    usage.api_calls += api_calls;
    usage.files_modified += files_modified;
}

/// Rejects with the first exceeded dimension, checked in token/file/API-call
/// order. A limit left unset (`None`) imposes no ceiling on that dimension.
pub fn check_resource_limits(limits: &ResourceLimits, usage: &ResourceUsage) -> PermissionDecision {
    if let Some(max) = limits.max_tokens_per_step {
        if usage.tokens > max {
            return PermissionDecision::Deny {
                reason: format!("token limit exceeded: {} > {max}", usage.tokens),
            };
        }
    }
    if let Some(max) = limits.max_files_per_step {
        if usage.files_modified > max {
            return PermissionDecision::Deny {
                reason: format!("file limit exceeded: {} > {max}", usage.files_modified),
            };
        }
    }
    if let Some(max) = limits.max_api_calls {
        if usage.api_calls > max {
            return PermissionDecision::Deny {
                reason: format!("api call limit exceeded: {} > {max}", usage.api_calls),
            };
        }
    }
    PermissionDecision::Allow
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(candidate))
        .unwrap_or(false)
}

fn regex_match(pattern: &str, candidate: &str) -> bool {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NeverAllowRule, ToolPolicy};

    fn profile(name: &str) -> PermissionsProfile {
        PermissionsProfile {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn never_allow_beats_always_allow() {
        let mut p = profile("p");
        p.tools.always_allow.push("shell".to_string());
        p.tools.never_allow.push(NeverAllowRule {
            tool: "shell".to_string(),
            patterns: vec![],
        });
        let facts = PermissionFacts {
            profile: &p,
            tool: "shell",
            target_path: None,
            command: None,
            previously_approved: false,
        };
        assert!(matches!(
            evaluate_tool_check(&facts),
            PermissionDecision::Deny { .. }
        ));
    }

    #[test]
    fn ask_once_allows_when_previously_approved() {
        let mut p = profile("p");
        p.tools.ask_once.push("write_file".to_string());
        let facts = PermissionFacts {
            profile: &p,
            tool: "write_file",
            target_path: None,
            command: None,
            previously_approved: true,
        };
        assert_eq!(evaluate_tool_check(&facts), PermissionDecision::Allow);
    }

    #[test]
    fn default_is_deny() {
        let p = profile("p");
        let facts = PermissionFacts {
            profile: &p,
            tool: "mystery_tool",
            target_path: None,
            command: None,
            previously_approved: false,
        };
        assert!(matches!(
            evaluate_tool_check(&facts),
            PermissionDecision::Deny { .. }
        ));
    }

    #[test]
    fn inheritance_merges_lists_and_detects_cycles() {
        let mut profiles = HashMap::new();
        let mut base = profile("base");
        base.tools.always_allow.push("read_file".to_string());
        let mut child = profile("child");
        child.inherits = Some("base".to_string());
        child.tools.always_allow.push("write_file".to_string());
        profiles.insert("base".to_string(), base);
        profiles.insert("child".to_string(), child);

        let resolved = resolve_inheritance("child", &profiles).unwrap();
        assert!(resolved.tools.always_allow.contains(&"read_file".to_string()));
        assert!(resolved.tools.always_allow.contains(&"write_file".to_string()));

        let mut cyclic = HashMap::new();
        let mut a = profile("a");
        a.inherits = Some("b".to_string());
        let mut b = profile("b");
        b.inherits = Some("a".to_string());
        cyclic.insert("a".to_string(), a);
        cyclic.insert("b".to_string(), b);
        assert!(matches!(
            resolve_inheritance("a", &cyclic),
            Err(WorkflowError::CircularInheritance { .. })
        ));
    }

    #[test]
    fn file_read_denies_protected_before_checking_readable() {
        let mut policy = FileAccessPolicy::default();
        policy.readable.push("/workspace/**".to_string());
        policy.protected.push("/workspace/.env".to_string());
        assert_eq!(
            check_file_read(&policy, "/workspace/.env"),
            PermissionDecision::Deny {
                reason: "path `/workspace/.env` matches protected pattern `/workspace/.env`".to_string()
            }
        );
        assert_eq!(check_file_read(&policy, "/workspace/notes.md"), PermissionDecision::Allow);
        assert!(matches!(
            check_file_read(&policy, "/etc/passwd"),
            PermissionDecision::Deny { .. }
        ));
    }

    #[test]
    fn file_write_checks_writable_not_readable() {
        let mut policy = FileAccessPolicy::default();
        policy.readable.push("/workspace/**".to_string());
        policy.writable.push("/workspace/out/**".to_string());
        assert!(matches!(
            check_file_write(&policy, "/workspace/notes.md"),
            PermissionDecision::Deny { .. }
        ));
        assert_eq!(
            check_file_write(&policy, "/workspace/out/report.md"),
            PermissionDecision::Allow
        );
    }

    #[test]
    fn command_check_allows_everything_when_allowlist_empty() {
        let policy = CommandAccessPolicy::default();
        assert_eq!(check_command(&policy, "rm -rf /"), PermissionDecision::Allow);
    }

    #[test]
    fn command_check_denied_pattern_wins_over_allowed() {
        let mut policy = CommandAccessPolicy::default();
        policy.allowed.push(".*".to_string());
        policy.denied.push("rm -rf".to_string());
        assert!(matches!(
            check_command(&policy, "rm -rf /"),
            PermissionDecision::Deny { .. }
        ));
        assert_eq!(check_command(&policy, "ls -la"), PermissionDecision::Allow);
    }

    #[test]
    fn resource_limits_reject_the_first_exceeded_dimension() {
        let limits = ResourceLimits {
            max_tokens_per_step: Some(100),
            max_files_per_step: Some(2),
            max_api_calls: Some(5),
            ..Default::default()
        };
        let mut usage = ResourceUsage::default();
        update_usage(&mut usage, 150, 1, 0);
        assert!(matches!(
            check_resource_limits(&limits, &usage),
            PermissionDecision::Deny { .. }
        ));

        let mut within = ResourceUsage::default();
        update_usage(&mut within, 50, 1, 1);
        assert_eq!(check_resource_limits(&limits, &within), PermissionDecision::Allow);
    }

    #[test]
    fn constrained_tool_denies_path_outside_allowlist() {
        let mut p = profile("p");
        p.tools.allow_with_constraints.push(ToolConstraint {
            tool: "write_file".to_string(),
            allowed_paths: vec!["/workspace/**".to_string()],
            allowed_commands: vec![],
            allowed_patterns: vec![],
        });
        let facts = PermissionFacts {
            profile: &p,
            tool: "write_file",
            target_path: Some("/etc/passwd"),
            command: None,
            previously_approved: false,
        };
        assert!(matches!(
            evaluate_tool_check(&facts),
            PermissionDecision::Deny { .. }
        ));
    }
}
