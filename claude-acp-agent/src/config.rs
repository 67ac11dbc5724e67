//! Session configuration catalog
//!
//! Every session-level knob is described here: its identifier, its allowed
//! values, and whether it can change after the session exists. Descriptors
//! are rendered on demand from live session state — the catalog itself never
//! caches a value.
//!
//! Two mutability classes exist. Runtime-mutable options (model, mode,
//! thought level, thinking-token budget, output style, partial-message
//! streaming, the dynamic MCP server set) are applied through
//! [`crate::agent::ClaudeAcpAgent::set_session_config_option`]. Everything
//! else is creation-time only and is rejected after construction.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Permission and execution mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    Delegate,
    DontAsk,
    BypassPermissions,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Default
    }
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::Delegate => "delegate",
            PermissionMode::DontAsk => "dontAsk",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(PermissionMode::Default),
            "acceptEdits" => Some(PermissionMode::AcceptEdits),
            "plan" => Some(PermissionMode::Plan),
            "delegate" => Some(PermissionMode::Delegate),
            "dontAsk" => Some(PermissionMode::DontAsk),
            "bypassPermissions" => Some(PermissionMode::BypassPermissions),
            _ => None,
        }
    }

    /// The modes a session may use. Bypass is conditionally available.
    pub fn available(allow_bypass: bool) -> Vec<PermissionMode> {
        let mut modes = vec![
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::Plan,
            PermissionMode::Delegate,
            PermissionMode::DontAsk,
        ];
        if allow_bypass {
            modes.push(PermissionMode::BypassPermissions);
        }
        modes
    }
}

/// Reasoning depth tiers, each mapped to a concrete thinking-token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtLevel {
    Adaptive,
    Low,
    Medium,
    High,
}

impl ThoughtLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtLevel::Adaptive => "adaptive",
            ThoughtLevel::Low => "low",
            ThoughtLevel::Medium => "medium",
            ThoughtLevel::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "adaptive" => Some(ThoughtLevel::Adaptive),
            "low" => Some(ThoughtLevel::Low),
            "medium" => Some(ThoughtLevel::Medium),
            "high" => Some(ThoughtLevel::High),
            _ => None,
        }
    }

    /// Concrete token budget for this tier. Adaptive defers to the backend.
    pub fn token_budget(&self) -> Option<u32> {
        match self {
            ThoughtLevel::Adaptive => None,
            ThoughtLevel::Low => Some(1024),
            ThoughtLevel::Medium => Some(4096),
            ThoughtLevel::High => Some(8192),
        }
    }

    /// Inverse inference: pick the tier whose budget covers the given value.
    pub fn infer(max_thinking_tokens: Option<u32>) -> Self {
        match max_thinking_tokens {
            None => ThoughtLevel::Adaptive,
            Some(tokens) if tokens <= 1024 => ThoughtLevel::Low,
            Some(tokens) if tokens <= 4096 => ThoughtLevel::Medium,
            Some(_) => ThoughtLevel::High,
        }
    }
}

/// Rewind tool routing preference. Creation-time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewindPolicy {
    AcpWrapper,
    Native,
    Both,
}

impl RewindPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewindPolicy::AcpWrapper => "acp_wrapper",
            RewindPolicy::Native => "native",
            RewindPolicy::Both => "both",
        }
    }
}

/// Base built-in tool set, decided once at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSetConfig {
    Preset { preset: String },
    Empty,
    Custom { tools: Vec<String> },
}

impl Default for ToolSetConfig {
    fn default() -> Self {
        ToolSetConfig::Preset {
            preset: "claude_code".to_string(),
        }
    }
}

impl ToolSetConfig {
    pub fn value_id(&self) -> &'static str {
        match self {
            ToolSetConfig::Preset { preset } if preset == "claude_code" => "preset_claude_code",
            ToolSetConfig::Preset { .. } => "custom",
            ToolSetConfig::Empty => "none",
            ToolSetConfig::Custom { .. } => "custom",
        }
    }
}

/// Configuration for MCP server connections forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Process-level agent configuration, computed once at bootstrap and passed
/// in explicitly.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Whether bypass-permissions mode may be offered at all.
    pub allow_bypass: bool,
    /// Checkpoint list cap per session; oldest evicted first.
    pub max_checkpoints: usize,
    /// Finalized background task id cap; oldest evicted first.
    pub max_finalized_tasks: usize,
    /// Byte cap for background output tail reads.
    pub tail_max_bytes: u64,
    /// Line cap for background output tail reads.
    pub tail_max_lines: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            allow_bypass: true,
            max_checkpoints: 5000,
            max_finalized_tasks: 5000,
            tail_max_bytes: 8 * 1024,
            tail_max_lines: 80,
        }
    }
}

/// Bypass permissions cannot work for a root/sudo user outside a sandbox.
/// Bootstrap code calls this once and feeds the result into [`AgentConfig`].
#[cfg(unix)]
pub fn detect_allow_bypass() -> bool {
    let is_root = nix::unistd::geteuid().is_root();
    !is_root || std::env::var_os("IS_SANDBOX").is_some()
}

#[cfg(not(unix))]
pub fn detect_allow_bypass() -> bool {
    true
}

/// Stable identifiers for every catalog entry.
pub mod ids {
    pub const MODEL: &str = "model";
    pub const MODE: &str = "mode";
    pub const THOUGHT_LEVEL: &str = "thought_level";
    pub const MAX_THINKING_TOKENS: &str = "max_thinking_tokens";
    pub const OUTPUT_STYLE: &str = "output_style";
    pub const REWIND_POLICY: &str = "rewind_policy";
    pub const ADDITIONAL_DIRECTORIES: &str = "additional_directories";
    pub const ALLOWED_TOOLS: &str = "allowed_tools";
    pub const DISALLOWED_TOOLS: &str = "disallowed_tools";
    pub const TOOLS: &str = "tools";
    pub const ENV: &str = "env";
    pub const ENABLE_FILE_CHECKPOINTING: &str = "enable_file_checkpointing";
    pub const PERSIST_SESSION: &str = "persist_session";
    pub const MAX_TURNS: &str = "max_turns";
    pub const MAX_BUDGET_USD: &str = "max_budget_usd";
    pub const MCP_SERVERS: &str = "mcp_servers";
    pub const SANDBOX: &str = "sandbox";
    pub const ENABLE_PARTIAL_MESSAGES: &str = "enable_partial_messages";
    pub const BETAS: &str = "betas";
    pub const SYSTEM_PROMPT: &str = "system_prompt";
    pub const OUTPUT_FORMAT: &str = "output_format";
    pub const AGENTS: &str = "agents";
    pub const SETTING_SOURCES: &str = "setting_sources";
    pub const FALLBACK_MODEL: &str = "fallback_model";
    pub const USER: &str = "user";
    pub const CLI_PATH: &str = "cli_path";
}

/// One selectable value for a config option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn described(
        value: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            name: name.into(),
            description: Some(description.into()),
        }
    }
}

/// A named group of select options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectGroup {
    pub group: String,
    pub name: String,
    pub options: Vec<SelectOption>,
}

/// Flat or grouped allowed-value sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigOptionValues {
    Flat(Vec<SelectOption>),
    Grouped(Vec<SelectGroup>),
}

impl ConfigOptionValues {
    /// All value ids, regardless of grouping.
    pub fn value_ids(&self) -> Vec<&str> {
        match self {
            ConfigOptionValues::Flat(options) => {
                options.iter().map(|o| o.value.as_str()).collect()
            }
            ConfigOptionValues::Grouped(groups) => groups
                .iter()
                .flat_map(|g| g.options.iter().map(|o| o.value.as_str()))
                .collect(),
        }
    }
}

/// A rendered catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    pub id: String,
    #[serde(rename = "type")]
    pub option_type: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub current_value: String,
    pub options: ConfigOptionValues,
}

fn toggle_options() -> Vec<SelectOption> {
    vec![
        SelectOption::new("enabled", "Enabled"),
        SelectOption::new("disabled", "Disabled"),
    ]
}

fn custom_state_options() -> Vec<SelectOption> {
    vec![
        SelectOption::new("default", "Default"),
        SelectOption::new("custom", "Custom"),
    ]
}

fn tools_options() -> Vec<SelectOption> {
    vec![
        SelectOption::new("preset_claude_code", "Claude Code Preset"),
        SelectOption::new("none", "No Built-in Tools"),
        SelectOption::new("custom", "Custom Tool Set"),
    ]
}

fn rewind_policy_options() -> Vec<SelectOption> {
    vec![
        SelectOption::described(
            "acp_wrapper",
            "ACP Wrapper",
            "Prefer the client rewind tool and disallow the native one.",
        ),
        SelectOption::described(
            "native",
            "Native Tool",
            "Allow the native rewind tool and disallow the client wrapper.",
        ),
        SelectOption::described("both", "Allow Both", "Allow both rewind tools."),
    ]
}

fn thought_level_groups() -> Vec<SelectGroup> {
    vec![
        SelectGroup {
            group: "balanced".to_string(),
            name: "Balanced".to_string(),
            options: vec![
                SelectOption::described(
                    "adaptive",
                    "Adaptive",
                    "Use backend defaults for balanced reasoning depth.",
                ),
                SelectOption::described("low", "Low", "Faster responses with lighter reasoning."),
                SelectOption::described("medium", "Medium", "Balanced depth and response speed."),
            ],
        },
        SelectGroup {
            group: "deep".to_string(),
            name: "Deep Reasoning".to_string(),
            options: vec![SelectOption::described(
                "high",
                "High",
                "More reasoning tokens for harder tasks.",
            )],
        },
    ]
}

fn toggle_value_id(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn custom_value_id(custom: bool) -> &'static str {
    if custom {
        "custom"
    } else {
        "default"
    }
}

/// Render "unlimited" or the literal number.
pub fn to_max_value_id(value: Option<u32>) -> String {
    match value {
        None => "unlimited".to_string(),
        Some(value) => value.to_string(),
    }
}

/// Parse "unlimited" or a non-negative integer value id.
pub fn parse_max_value_id(value: &str) -> Result<Option<u32>> {
    if value == "unlimited" {
        return Ok(None);
    }
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|_| AgentError::InvalidRequest(format!("Invalid numeric value: {}", value)))
}

/// Option list: unlimited + fixed base values + the current value if it is
/// not one of the base values.
pub fn max_value_options(
    base_values: &[u32],
    current: Option<u32>,
    unlimited_label: &str,
) -> Vec<SelectOption> {
    let mut options = vec![SelectOption::new("unlimited", unlimited_label)];
    for value in base_values {
        options.push(SelectOption::new(value.to_string(), value.to_string()));
    }
    if let Some(current) = current {
        if !base_values.contains(&current) {
            options.push(SelectOption::new(
                current.to_string(),
                format!("{} (custom)", current),
            ));
        }
    }
    options
}

fn budget_value_id(value: Option<f64>) -> String {
    match value {
        None => "unlimited".to_string(),
        Some(value) => format_budget(value),
    }
}

fn format_budget(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as u64)
    } else {
        format!("{}", value)
    }
}

fn budget_options(base_values: &[f64], current: Option<f64>) -> Vec<SelectOption> {
    let mut options = vec![SelectOption::new("unlimited", "Unlimited")];
    for value in base_values {
        let id = format_budget(*value);
        options.push(SelectOption::new(id.clone(), id));
    }
    if let Some(current) = current {
        if !base_values.contains(&current) {
            let id = format_budget(current);
            options.push(SelectOption::new(id.clone(), format!("{} (custom)", id)));
        }
    }
    options
}

/// Group model options: recommended defaults first, then vendor prefixes.
fn grouped_model_options(options: &[SelectOption]) -> ConfigOptionValues {
    if options.is_empty() {
        return ConfigOptionValues::Flat(Vec::new());
    }

    let mut groups: Vec<(String, Vec<SelectOption>)> = Vec::new();
    for option in options {
        let group_id = if option.value == "default" {
            "recommended".to_string()
        } else if option.value.starts_with("claude-") {
            "claude".to_string()
        } else {
            option
                .value
                .split('-')
                .next()
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or("other")
                .to_string()
        };
        match groups.iter_mut().find(|(id, _)| *id == group_id) {
            Some((_, members)) => members.push(option.clone()),
            None => groups.push((group_id, vec![option.clone()])),
        }
    }

    if groups.len() <= 1 {
        return ConfigOptionValues::Grouped(vec![SelectGroup {
            group: "all_models".to_string(),
            name: "Available Models".to_string(),
            options: options.to_vec(),
        }]);
    }

    // Recommended and claude lead; the rest in name order.
    groups.sort_by(|(a, _), (b, _)| {
        let rank = |id: &str| match id {
            "recommended" => 0,
            "claude" => 1,
            _ => 2,
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });

    ConfigOptionValues::Grouped(
        groups
            .into_iter()
            .map(|(id, members)| {
                let name = match id.as_str() {
                    "recommended" => "Recommended".to_string(),
                    "claude" => "Claude".to_string(),
                    other => {
                        let mut chars = other.chars();
                        match chars.next() {
                            Some(first) => {
                                first.to_uppercase().collect::<String>() + chars.as_str()
                            }
                            None => other.to_string(),
                        }
                    }
                };
                SelectGroup {
                    group: id,
                    name,
                    options: members,
                }
            })
            .collect(),
    )
}

/// Live per-session configuration snapshot. Descriptor rendering reads this;
/// nothing here is cached in the catalog itself.
#[derive(Debug, Clone)]
pub struct SessionConfigState {
    pub mode: PermissionMode,
    pub available_modes: Vec<PermissionMode>,
    pub model_id: String,
    pub model_options: Vec<SelectOption>,
    pub thought_level: ThoughtLevel,
    pub max_thinking_tokens: Option<u32>,
    pub output_style_id: String,
    pub output_style_options: Vec<SelectOption>,
    pub rewind_policy: RewindPolicy,
    pub additional_directories_custom: bool,
    pub allowed_tools_custom: bool,
    pub disallowed_tools_custom: bool,
    pub tool_set: ToolSetConfig,
    pub env_custom: bool,
    pub enable_file_checkpointing: bool,
    pub persist_session: bool,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub mcp_servers_custom: bool,
    pub sandbox_enabled: bool,
    pub enable_partial_messages: bool,
    pub betas_custom: bool,
    pub system_prompt_custom: bool,
    pub output_format_custom: bool,
    pub agents_custom: bool,
    pub setting_sources_custom: bool,
    pub fallback_model_custom: bool,
    pub user_custom: bool,
    pub cli_path_custom: bool,
    pub account_info: Option<Value>,
}

impl SessionConfigState {
    /// Render the full catalog from the live snapshot.
    pub fn render_options(&self) -> Vec<ConfigOption> {
        let select = |id: &str,
                      name: &str,
                      category: &str,
                      description: &str,
                      current_value: String,
                      options: ConfigOptionValues| ConfigOption {
            id: id.to_string(),
            option_type: "select".to_string(),
            name: name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            current_value,
            options,
        };

        vec![
            select(
                ids::MODEL,
                "Model",
                "model",
                "Active model used for this session.",
                self.model_id.clone(),
                grouped_model_options(&self.model_options),
            ),
            select(
                ids::MODE,
                "Mode",
                "mode",
                "Permission and execution mode for this session.",
                self.mode.as_str().to_string(),
                ConfigOptionValues::Flat(
                    self.available_modes
                        .iter()
                        .map(|mode| SelectOption::new(mode.as_str(), mode.as_str()))
                        .collect(),
                ),
            ),
            select(
                ids::THOUGHT_LEVEL,
                "Thought Level",
                "thought_level",
                "Reasoning depth and token budget for responses.",
                self.thought_level.as_str().to_string(),
                ConfigOptionValues::Grouped(thought_level_groups()),
            ),
            select(
                ids::MAX_THINKING_TOKENS,
                "Max Thinking Tokens",
                "_claude_max_thinking_tokens",
                "Maximum reasoning tokens for this session. Runtime mutable.",
                to_max_value_id(self.max_thinking_tokens),
                ConfigOptionValues::Flat(max_value_options(
                    &[1024, 4096, 8192],
                    self.max_thinking_tokens,
                    "Adaptive (backend default)",
                )),
            ),
            select(
                ids::OUTPUT_STYLE,
                "Output Style",
                "_claude_output_style",
                "Output style profile.",
                self.output_style_id.clone(),
                ConfigOptionValues::Flat(self.output_style_options.clone()),
            ),
            select(
                ids::REWIND_POLICY,
                "Rewind Tool Policy",
                "_claude_rewind_policy",
                "Rewind tool routing preference. Creation-time only.",
                self.rewind_policy.as_str().to_string(),
                ConfigOptionValues::Flat(rewind_policy_options()),
            ),
            select(
                ids::ADDITIONAL_DIRECTORIES,
                "Additional Directories",
                "_claude_additional_directories",
                "Whether extra filesystem directories are configured. Creation-time only.",
                custom_value_id(self.additional_directories_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::ALLOWED_TOOLS,
                "Allowed Tools",
                "_claude_allowed_tools",
                "Whether an explicit allowed tool list is configured. Creation-time only.",
                custom_value_id(self.allowed_tools_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::DISALLOWED_TOOLS,
                "Disallowed Tools",
                "_claude_disallowed_tools",
                "Whether an explicit disallowed tool list is configured. Creation-time only.",
                custom_value_id(self.disallowed_tools_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::TOOLS,
                "Tool Set",
                "_claude_tools",
                "Base built-in tool set configuration. Creation-time only.",
                self.tool_set.value_id().to_string(),
                ConfigOptionValues::Flat(tools_options()),
            ),
            select(
                ids::ENV,
                "Environment Variables",
                "_claude_env",
                "Whether custom environment variables are configured. Creation-time only.",
                custom_value_id(self.env_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::ENABLE_FILE_CHECKPOINTING,
                "File Checkpointing",
                "_claude_enable_file_checkpointing",
                "Tracks file history for rewind operations. Creation-time only.",
                toggle_value_id(self.enable_file_checkpointing).to_string(),
                ConfigOptionValues::Flat(toggle_options()),
            ),
            select(
                ids::PERSIST_SESSION,
                "Persist Session",
                "_claude_persist_session",
                "Persist conversation transcript to disk. Creation-time only.",
                toggle_value_id(self.persist_session).to_string(),
                ConfigOptionValues::Flat(toggle_options()),
            ),
            select(
                ids::MAX_TURNS,
                "Max Turns",
                "_claude_max_turns",
                "Maximum turns before the conversation stops. Creation-time only.",
                to_max_value_id(self.max_turns),
                ConfigOptionValues::Flat(max_value_options(
                    &[10, 25, 50, 100],
                    self.max_turns,
                    "Unlimited",
                )),
            ),
            select(
                ids::MAX_BUDGET_USD,
                "Max Budget (USD)",
                "_claude_max_budget_usd",
                "Maximum budget before the conversation stops. Creation-time only.",
                budget_value_id(self.max_budget_usd),
                ConfigOptionValues::Flat(budget_options(
                    &[1.0, 5.0, 10.0, 20.0],
                    self.max_budget_usd,
                )),
            ),
            select(
                ids::MCP_SERVERS,
                "MCP Servers",
                "_claude_mcp_servers",
                "Dynamic MCP server state. Runtime mutable: select default to clear \
                 dynamic servers; use the set-servers extension call to define custom servers.",
                custom_value_id(self.mcp_servers_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::SANDBOX,
                "Sandbox",
                "_claude_sandbox",
                "Sandbox command execution behavior. Creation-time only.",
                toggle_value_id(self.sandbox_enabled).to_string(),
                ConfigOptionValues::Flat(toggle_options()),
            ),
            select(
                ids::ENABLE_PARTIAL_MESSAGES,
                "Streaming Partial Messages",
                "_claude_enable_partial_messages",
                "Enable real-time streaming of partial messages. Runtime mutable.",
                toggle_value_id(self.enable_partial_messages).to_string(),
                ConfigOptionValues::Flat(toggle_options()),
            ),
            select(
                ids::BETAS,
                "Beta Features",
                "_claude_betas",
                "Enable experimental backend beta features. Creation-time only.",
                custom_value_id(self.betas_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::SYSTEM_PROMPT,
                "System Prompt",
                "_claude_system_prompt",
                "Custom system prompt configuration. Creation-time only.",
                custom_value_id(self.system_prompt_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::OUTPUT_FORMAT,
                "Structured Output",
                "_claude_output_format",
                "JSON Schema output format configuration. Creation-time only.",
                custom_value_id(self.output_format_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::AGENTS,
                "Subagent Definitions",
                "_claude_agents",
                "Programmatic subagent definitions. Creation-time only.",
                custom_value_id(self.agents_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::SETTING_SOURCES,
                "Setting Sources",
                "_claude_setting_sources",
                "Filesystem setting sources. Creation-time only.",
                custom_value_id(self.setting_sources_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::FALLBACK_MODEL,
                "Fallback Model",
                "_claude_fallback_model",
                "Automatic failover model when the primary fails. Creation-time only.",
                custom_value_id(self.fallback_model_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::USER,
                "User Identifier",
                "_claude_user",
                "User identifier for analytics and tracking. Creation-time only.",
                custom_value_id(self.user_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
            select(
                ids::CLI_PATH,
                "CLI Path",
                "_claude_cli_path",
                "Custom path to the backend executable. Creation-time only.",
                custom_value_id(self.cli_path_custom).to_string(),
                ConfigOptionValues::Flat(custom_state_options()),
            ),
        ]
    }
}

/// Creation-time-only option ids, used to reject runtime mutation attempts
/// with a descriptive error.
pub const CREATION_TIME_ONLY_IDS: &[&str] = &[
    ids::REWIND_POLICY,
    ids::ADDITIONAL_DIRECTORIES,
    ids::ALLOWED_TOOLS,
    ids::DISALLOWED_TOOLS,
    ids::TOOLS,
    ids::ENV,
    ids::ENABLE_FILE_CHECKPOINTING,
    ids::PERSIST_SESSION,
    ids::MAX_TURNS,
    ids::MAX_BUDGET_USD,
    ids::SANDBOX,
    ids::BETAS,
    ids::SYSTEM_PROMPT,
    ids::OUTPUT_FORMAT,
    ids::AGENTS,
    ids::SETTING_SOURCES,
    ids::FALLBACK_MODEL,
    ids::USER,
    ids::CLI_PATH,
];

/// Parameters for creating a session. Everything here is creation-time
/// input; the runtime-mutable subset is mirrored into the session snapshot.
#[derive(Debug, Clone, Default)]
pub struct NewSessionParams {
    pub cwd: PathBuf,
    pub mcp_servers: HashMap<String, McpServerConfig>,
    pub mode: Option<PermissionMode>,
    pub model: Option<String>,
    pub thought_level: Option<ThoughtLevel>,
    pub max_thinking_tokens: Option<u32>,
    pub output_style: Option<String>,
    pub rewind_policy: Option<RewindPolicy>,
    pub additional_directories: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub tools: Option<ToolSetConfig>,
    pub env: HashMap<String, String>,
    pub enable_file_checkpointing: Option<bool>,
    pub persist_session: Option<bool>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub sandbox: Option<bool>,
    pub enable_partial_messages: Option<bool>,
    pub betas: Vec<String>,
    pub system_prompt: Option<Value>,
    pub output_format: Option<Value>,
    pub agents: Option<Value>,
    pub setting_sources: Vec<String>,
    pub fallback_model: Option<String>,
    pub user: Option<String>,
    pub cli_path: Option<String>,
}

impl NewSessionParams {
    /// Validate creation parameters before any session state exists.
    pub fn validate(&self, allow_bypass: bool) -> Result<()> {
        if let Some(mode) = self.mode {
            if !PermissionMode::available(allow_bypass).contains(&mode) {
                return Err(AgentError::InvalidRequest(format!(
                    "Unsupported startup mode: {}",
                    mode.as_str()
                )));
            }
        }
        if let Some(max_turns) = self.max_turns {
            if max_turns == 0 {
                return Err(AgentError::InvalidRequest(
                    "max_turns must be greater than zero".to_string(),
                ));
            }
        }
        if let Some(budget) = self.max_budget_usd {
            if !budget.is_finite() || budget < 0.0 {
                return Err(AgentError::InvalidRequest(format!(
                    "Invalid startup max budget usd: {}",
                    budget
                )));
            }
        }
        Ok(())
    }

    /// Effective thinking-token budget, with an explicit thought level
    /// overriding a raw token value.
    pub fn effective_max_thinking_tokens(&self) -> Option<u32> {
        match self.thought_level {
            Some(level) => level.token_budget(),
            None => self.max_thinking_tokens,
        }
    }
}
