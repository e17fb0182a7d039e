//! Loads workflow and profile TOML documents from disk and resolves
//! permissions-profile inheritance.

use crate::config::EngineConfig;
use std::collections::HashMap;
use std::path::Path;
use workflow_kernel::model::{PermissionsProfile, PreferencesProfile, WorkflowDefinition};
use workflow_kernel::permissions;
use workflow_kernel::{WorkflowError, WorkflowResult};

fn toml_error(path: &Path, err: toml::de::Error) -> WorkflowError {
    WorkflowError::Validation {
        workflow: path.display().to_string(),
        message: err.to_string(),
    }
}

pub fn load_workflow(config: &EngineConfig, name: &str) -> WorkflowResult<WorkflowDefinition> {
    let path = config.workflows_dir.join(format!("{name}.toml"));
    if !path.exists() {
        return Err(WorkflowError::Validation {
            workflow: name.to_string(),
            message: "workflow definition not found".to_string(),
        });
    }
    let contents = std::fs::read_to_string(&path)?;
    let workflow: WorkflowDefinition = toml::from_str(&contents).map_err(|e| toml_error(&path, e))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Structural checks beyond what serde's required-field deserialization
/// already enforces: step names are unique and every `depends_on` refers to
/// an existing step.
fn validate_workflow(workflow: &WorkflowDefinition) -> WorkflowResult<()> {
    let mut seen = std::collections::HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::Validation {
                workflow: workflow.name.clone(),
                message: format!("duplicate step name `{}`", step.name),
            });
        }
    }
    for step in &workflow.steps {
        if let Some(dep) = &step.depends_on {
            if !workflow.steps.iter().any(|s| &s.name == dep) {
                return Err(WorkflowError::Validation {
                    workflow: workflow.name.clone(),
                    message: format!("step `{}` depends_on unknown step `{dep}`", step.name),
                });
            }
        }
    }
    Ok(())
}

pub fn list_workflows(config: &EngineConfig) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(&config.workflows_dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            if path.extension().and_then(|s| s.to_str()) != Some("toml") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            if stem.starts_with('_') {
                return None;
            }
            Some(stem)
        })
        .collect()
}

fn load_profile_raw(dir: &Path, name: &str) -> WorkflowResult<PermissionsProfile> {
    let path = dir.join(format!("{name}.toml"));
    if !path.exists() {
        return Err(WorkflowError::ProfileNotFound {
            name: name.to_string(),
        });
    }
    let contents = std::fs::read_to_string(&path)?;
    toml::from_str(&contents).map_err(|e| toml_error(&path, e))
}

/// Load every `.toml` profile under `permissions_dir` and resolve `name`'s
/// inheritance chain against that set.
pub fn load_permissions_profile(
    config: &EngineConfig,
    name: &str,
) -> WorkflowResult<PermissionsProfile> {
    let mut profiles = HashMap::new();
    let Ok(entries) = std::fs::read_dir(&config.permissions_dir) else {
        return Err(WorkflowError::ProfileNotFound {
            name: name.to_string(),
        });
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let profile = load_profile_raw(&config.permissions_dir, stem)?;
        profiles.insert(stem.to_string(), profile);
    }
    permissions::resolve_inheritance(name, &profiles)
}

pub fn load_preferences_profile(
    config: &EngineConfig,
    name: &str,
) -> WorkflowResult<PreferencesProfile> {
    let path = config.preferences_dir.join(format!("{name}.toml"));
    if !path.exists() {
        return Err(WorkflowError::ProfileNotFound {
            name: name.to_string(),
        });
    }
    let contents = std::fs::read_to_string(&path)?;
    toml::from_str(&contents).map_err(|e| toml_error(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_a_minimal_workflow() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.workflows_dir = tmp.path().join("definitions");
        write_file(
            &config.workflows_dir,
            "hello.toml",
            r#"
name = "hello"

[[steps]]
name = "say-hi"
shell_command = "echo hi"
"#,
        );
        let workflow = load_workflow(&config, "hello").unwrap();
        assert_eq!(workflow.steps.len(), 1);
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.workflows_dir = tmp.path().join("definitions");
        write_file(
            &config.workflows_dir,
            "dup.toml",
            r#"
name = "dup"

[[steps]]
name = "a"
shell_command = "echo 1"

[[steps]]
name = "a"
shell_command = "echo 2"
"#,
        );
        assert!(load_workflow(&config, "dup").is_err());
    }

    #[test]
    fn resolves_permission_profile_inheritance_from_disk() {
        let tmp = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.permissions_dir = tmp.path().join("permissions");
        write_file(
            &config.permissions_dir,
            "base.toml",
            r#"
name = "base"
[tools]
always_allow = ["read_file"]
"#,
        );
        write_file(
            &config.permissions_dir,
            "child.toml",
            r#"
name = "child"
inherits = "base"
[tools]
always_allow = ["write_file"]
"#,
        );
        let resolved = load_permissions_profile(&config, "child").unwrap();
        assert!(resolved.tools.always_allow.contains(&"read_file".to_string()));
        assert!(resolved.tools.always_allow.contains(&"write_file".to_string()));
    }
}
