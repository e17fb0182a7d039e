use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Minimal,
    #[default]
    Standard,
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuditConfig {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub include_prompts: bool,
    #[serde(default)]
    pub include_outputs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BudgetConfig {
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub on_success: Vec<String>,
    #[serde(default)]
    pub on_failure: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Cron,
    Watch,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub watch: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            cron: None,
            watch: None,
            event: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableDeclaration {
    pub name: String,
    #[serde(rename = "type", default = "default_variable_type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_variable_type() -> VariableType {
    VariableType::String
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Abort,
    Skip,
    Retry,
    Pause,
    Continue,
}

impl Default for OnError {
    fn default() -> Self {
        Self::Abort
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnLowConfidence {
    Retry,
    Abort,
    ManualReview,
}

impl Default for OnLowConfidence {
    fn default() -> Self {
        Self::Abort
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelChoice {
    Auto,
    Haiku,
    Sonnet,
    Opus,
}

impl Default for ModelChoice {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Exactly one of these is set per step; `branch_block` carries its own arms.
/// Closed tagged union, per the redesign note: dispatch is an exhaustive match,
/// new kinds require a new constructor rather than a new string literal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StepKind {
    ShellCommand { shell_command: String },
    SlashCommand { slash_command: String },
    LlmPrompt { llm_prompt: String },
    AgentInvocation { agent_invocation: String },
    FrameworkInvocation { framework_invocation: String },
    ScriptPath { script_path: String },
    TemplateOutput { template_output: String },
    BranchBlock { branch_block: Vec<BranchArm> },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::ShellCommand { .. } => "shell_command",
            StepKind::SlashCommand { .. } => "slash_command",
            StepKind::LlmPrompt { .. } => "llm_prompt",
            StepKind::AgentInvocation { .. } => "agent_invocation",
            StepKind::FrameworkInvocation { .. } => "framework_invocation",
            StepKind::ScriptPath { .. } => "script_path",
            StepKind::TemplateOutput { .. } => "template_output",
            StepKind::BranchBlock { .. } => "branch_block",
        }
    }

    pub fn default_complexity(&self) -> Complexity {
        match self {
            StepKind::ShellCommand { .. }
            | StepKind::SlashCommand { .. }
            | StepKind::ScriptPath { .. } => Complexity::Low,
            StepKind::LlmPrompt { .. } | StepKind::TemplateOutput { .. } => Complexity::Medium,
            StepKind::AgentInvocation { .. }
            | StepKind::FrameworkInvocation { .. }
            | StepKind::BranchBlock { .. } => Complexity::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchArm {
    pub condition: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,

    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub r#loop: Option<String>,
    #[serde(default)]
    pub loop_alias: Option<String>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub store_as: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub confidence_gate: Option<u8>,
    #[serde(default)]
    pub on_low_confidence: OnLowConfidence,

    #[serde(default)]
    pub model: ModelChoice,
    #[serde(default)]
    pub complexity: Option<Complexity>,

    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_steps() -> u32 {
    50
}

fn default_timeout() -> String {
    "30m".to_string()
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            on_error: OnError::default(),
            max_steps: default_max_steps(),
            timeout: default_timeout(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub permissions_profile: Option<String>,
    #[serde(default)]
    pub preferences_profile: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableDeclaration>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(flatten)]
    pub settings: WorkflowSettings,
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

// --- Permissions profile -----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolConstraint {
    pub tool: String,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NeverAllowRule {
    pub tool: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolPolicy {
    #[serde(default)]
    pub always_allow: Vec<String>,
    #[serde(default)]
    pub allow_with_constraints: Vec<ToolConstraint>,
    #[serde(default)]
    pub ask_once: Vec<String>,
    #[serde(default)]
    pub never_allow: Vec<NeverAllowRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileAccessPolicy {
    #[serde(default)]
    pub readable: Vec<String>,
    #[serde(default)]
    pub writable: Vec<String>,
    #[serde(default)]
    pub protected: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CommandAccessPolicy {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceLimits {
    #[serde(default)]
    pub max_file_size: Option<String>,
    #[serde(default)]
    pub max_files_per_step: Option<u32>,
    #[serde(default)]
    pub max_tokens_per_step: Option<u64>,
    #[serde(default)]
    pub max_api_calls: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SecretsPolicy {
    #[serde(default)]
    pub allowed_env_vars: Vec<String>,
    #[serde(default)]
    pub never_log: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PermissionsProfile {
    pub name: String,
    #[serde(default)]
    pub inherits: Option<String>,
    #[serde(default)]
    pub tools: ToolPolicy,
    #[serde(default)]
    pub file_access: FileAccessPolicy,
    #[serde(default)]
    pub command_access: CommandAccessPolicy,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub secrets: SecretsPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ModelDefaults {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub complex: Option<String>,
    #[serde(default)]
    pub simple: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PreferencesProfile {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub verbosity: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub models: ModelDefaults,
}

// --- Results & run-time records ---------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub model_used: Option<String>,
}

impl StepResult {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            data: Value::Null,
            confidence: None,
            error: None,
            tokens_used: 0,
            duration_ms: 0,
            model_used: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Success,
    Failed,
    Paused,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSummary {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowResult {
    pub workflow: String,
    pub run_id: String,
    pub state: RunState,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub steps: Vec<StepSummary>,
    pub tokens_used: u64,
    pub cost: f64,
    #[serde(default)]
    pub estimated: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEventType {
    Manual,
    Cron,
    Watch,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerEvent {
    pub trigger_type: TriggerEventType,
    pub workflow: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}
