//! Permission option menus and decision types
//!
//! The arbitration flows themselves live in `agent_permissions.rs`; this
//! module holds the shared vocabulary: options presented to the client, the
//! decision returned to the backend, persistence hints, and the
//! compatibility normalizer applied to tool input before any decision.

use crate::config::PermissionMode;
use crate::tool_classification::is_subagent_launcher;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One choice presented to the client during a permission round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOption {
    /// Unique identifier for this permission option
    pub option_id: String,
    /// Human-readable name for the option
    pub name: String,
    /// The kind of permission action this option represents
    pub kind: PermissionOptionKind,
}

impl PermissionOption {
    pub fn new(
        option_id: impl Into<String>,
        name: impl Into<String>,
        kind: PermissionOptionKind,
    ) -> Self {
        Self {
            option_id: option_id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// ACP permission option kinds as defined in the specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this specific tool call once
    AllowOnce,
    /// Allow all future calls of this tool type
    AllowAlways,
    /// Reject this specific tool call once
    RejectOnce,
    /// Reject all future calls of this tool type
    RejectAlways,
}

/// Outcome of a permission round-trip with the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The client cancelled the request (turn abort, disconnect).
    Cancelled,
    /// The client selected one of the offered options.
    Selected {
        #[serde(rename = "optionId")]
        option_id: String,
    },
}

/// The pending tool call described to the client alongside the options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    pub tool_call_id: String,
    pub title: String,
    pub raw_input: Value,
}

/// A blocking permission request sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub session_id: String,
    pub tool_call: PermissionToolCall,
    pub options: Vec<PermissionOption>,
}

/// Permission-persistence hint attached to an allow decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionUpdate {
    SetMode {
        mode: PermissionMode,
        destination: PermissionDestination,
    },
    AddRules {
        rules: Vec<PermissionRule>,
        behavior: RuleBehavior,
        destination: PermissionDestination,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    pub tool_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleBehavior {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionDestination {
    Session,
    ProjectSettings,
    UserSettings,
}

/// The decision returned to the backend for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionResult {
    Allow {
        #[serde(rename = "updatedInput")]
        updated_input: Value,
        #[serde(rename = "updatedPermissions", default)]
        updated_permissions: Vec<PermissionUpdate>,
    },
    Deny {
        message: String,
        #[serde(default)]
        interrupt: bool,
    },
}

impl PermissionResult {
    pub fn allow(updated_input: Value) -> Self {
        PermissionResult::Allow {
            updated_input,
            updated_permissions: Vec::new(),
        }
    }

    pub fn allow_with(updated_input: Value, updated_permissions: Vec<PermissionUpdate>) -> Self {
        PermissionResult::Allow {
            updated_input,
            updated_permissions,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        PermissionResult::Deny {
            message: message.into(),
            interrupt: true,
        }
    }
}

/// Session-scoped persistence hint allowing all future calls to one tool.
pub fn allow_rule_hint(tool_name: &str) -> Vec<PermissionUpdate> {
    vec![PermissionUpdate::AddRules {
        rules: vec![PermissionRule {
            tool_name: tool_name.to_string(),
        }],
        behavior: RuleBehavior::Allow,
        destination: PermissionDestination::Session,
    }]
}

/// Session-scoped persistence hint recording a mode transition.
pub fn set_mode_hint(mode: PermissionMode) -> Vec<PermissionUpdate> {
    vec![PermissionUpdate::SetMode {
        mode,
        destination: PermissionDestination::Session,
    }]
}

/// The standard three-option menu for ordinary tools.
pub fn default_tool_options() -> Vec<PermissionOption> {
    vec![
        PermissionOption::new("allow_always", "Always Allow", PermissionOptionKind::AllowAlways),
        PermissionOption::new("allow", "Allow", PermissionOptionKind::AllowOnce),
        PermissionOption::new("reject", "Reject", PermissionOptionKind::RejectOnce),
    ]
}

/// The plan-mode exit menu, in fixed order. Bypass-flavored entries appear
/// only when bypass is permitted; "keep planning" is always last.
pub fn exit_plan_options(allow_bypass: bool) -> Vec<PermissionOption> {
    let mut options = Vec::new();
    if allow_bypass {
        options.push(PermissionOption::new(
            "clearAndBypass",
            "Yes, clear context and bypass permissions",
            PermissionOptionKind::AllowAlways,
        ));
        options.push(PermissionOption::new(
            "bypassPermissions",
            "Yes, and bypass permissions",
            PermissionOptionKind::AllowAlways,
        ));
    }
    options.push(PermissionOption::new(
        "default",
        "Yes, manually approve edits",
        PermissionOptionKind::AllowOnce,
    ));
    options.push(PermissionOption::new(
        "plan",
        "No, keep planning",
        PermissionOptionKind::RejectOnce,
    ));
    options
}

/// Exploration depth requested through a legacy subagent-type alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExploreDepth {
    Quick,
    Medium,
    High,
}

impl ExploreDepth {
    fn as_str(&self) -> &'static str {
        match self {
            ExploreDepth::Quick => "quick",
            ExploreDepth::Medium => "medium",
            ExploreDepth::High => "high",
        }
    }
}

/// Rewrite legacy subagent-type aliases into canonical names.
///
/// Applies only to the subagent launcher tools. Namespace prefixes
/// (`ns:type`) are stripped before matching. Exploration-depth aliases map
/// to the canonical `Explore` type and prepend a thoroughness instruction to
/// the prompt — exactly once, even when the same invocation is normalized
/// again.
pub fn normalize_tool_input(tool_name: &str, input: &Value) -> Value {
    if !is_subagent_launcher(tool_name) {
        return input.clone();
    }

    let Some(object) = input.as_object() else {
        return input.clone();
    };
    let Some(current_type) = object.get("subagent_type").and_then(|v| v.as_str()) else {
        return input.clone();
    };
    let normalized = current_type.trim().to_lowercase();
    if normalized.is_empty() {
        return input.clone();
    }

    let without_namespace = normalized
        .rsplit(':')
        .find(|segment| !segment.is_empty())
        .unwrap_or(normalized.as_str());

    let (mapped_type, depth) = match without_namespace {
        "explore" => ("Explore", None),
        "explore-low" | "explore-quick" | "explore-fast" => ("Explore", Some(ExploreDepth::Quick)),
        "explore-medium" => ("Explore", Some(ExploreDepth::Medium)),
        "explore-high" | "explore-thorough" | "explore-very-thorough" | "explore-very-high" => {
            ("Explore", Some(ExploreDepth::High))
        }
        "plan" => ("Plan", None),
        "general-purpose" | "general_purpose" | "generalpurpose" => ("general-purpose", None),
        _ => return input.clone(),
    };

    let mut updated = object.clone();
    updated.insert(
        "subagent_type".to_string(),
        Value::String(mapped_type.to_string()),
    );

    if let Some(depth) = depth {
        let existing_prompt = object.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
        let already_prefaced = existing_prompt
            .to_lowercase()
            .contains("exploration thoroughness");
        if !already_prefaced {
            let preface = format!(
                "Use {} exploration thoroughness for this task.",
                depth.as_str()
            );
            let prompt = if existing_prompt.is_empty() {
                preface
            } else {
                format!("{}\n\n{}", preface, existing_prompt)
            };
            updated.insert("prompt".to_string(), Value::String(prompt));
        }
    }

    Value::Object(updated)
}
