//! Tool classification and title generation
//!
//! Maps backend tool invocations to the client-facing vocabulary: a kind
//! classification for icon selection, a human title derived from the tool
//! name and input, and optional location/content hints.

use agent_client_protocol::{
    Content, ContentBlock, Diff, TextContent, ToolCallContent, ToolCallLocation,
};
use serde_json::Value;
use std::path::PathBuf;

/// Prefix under which client-side tool wrappers are registered.
pub const CLIENT_TOOL_PREFIX: &str = "mcp__acp__";

/// Strip the client wrapper prefix so both spellings classify identically.
pub fn base_tool_name(name: &str) -> &str {
    name.strip_prefix(CLIENT_TOOL_PREFIX).unwrap_or(name)
}

/// Tools that launch subagents and may carry background work.
pub fn is_subagent_launcher(name: &str) -> bool {
    matches!(base_tool_name(name), "Task" | "Agent")
}

/// The plan-update tool translates to a structured plan, not a tool call.
pub fn is_plan_tool(name: &str) -> bool {
    base_tool_name(name) == "TodoWrite"
}

/// File-mutation tools auto-allowed in accept-edits mode.
pub fn is_edit_tool(name: &str) -> bool {
    matches!(
        base_tool_name(name),
        "Edit" | "Write" | "RewindFiles" | "NotebookEdit"
    )
}

/// Tool kind classification.
///
/// Carries `SwitchMode` for mode-changing tools even though the wire
/// protocol has no such kind; it narrows to `Other` at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Fetch,
    Think,
    SwitchMode,
    Other,
}

impl ToolKind {
    /// Convert to agent_client_protocol::ToolKind
    pub fn to_acp_kind(&self) -> agent_client_protocol::ToolKind {
        match self {
            ToolKind::Read => agent_client_protocol::ToolKind::Read,
            ToolKind::Edit => agent_client_protocol::ToolKind::Edit,
            ToolKind::Delete => agent_client_protocol::ToolKind::Delete,
            ToolKind::Move => agent_client_protocol::ToolKind::Move,
            ToolKind::Search => agent_client_protocol::ToolKind::Search,
            ToolKind::Execute => agent_client_protocol::ToolKind::Execute,
            ToolKind::Fetch => agent_client_protocol::ToolKind::Fetch,
            ToolKind::Think => agent_client_protocol::ToolKind::Think,
            // The protocol has no switch-mode kind.
            ToolKind::SwitchMode | ToolKind::Other => agent_client_protocol::ToolKind::Other,
        }
    }
}

/// Client-facing description of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub title: String,
    pub kind: ToolKind,
    pub content: Vec<ToolCallContent>,
    pub locations: Vec<ToolCallLocation>,
}

fn text_content(text: impl Into<String>) -> ToolCallContent {
    ToolCallContent::Content(Content::new(ContentBlock::Text(TextContent::new(text))))
}

fn location(path: &str) -> ToolCallLocation {
    ToolCallLocation::new(PathBuf::from(path))
}

fn location_at(path: &str, line: u32) -> ToolCallLocation {
    let mut loc = ToolCallLocation::new(PathBuf::from(path));
    loc.line = Some(line);
    loc
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

fn path_field(input: &Value) -> Option<&str> {
    str_field(input, "file_path").or_else(|| str_field(input, "path"))
}

/// Derive the kind, title, and hints for one tool invocation.
pub fn tool_info(tool_name: &str, input: &Value) -> ToolInfo {
    match base_tool_name(tool_name) {
        "Task" | "Agent" => ToolInfo {
            title: str_field(input, "description")
                .map(|d| d.to_string())
                .unwrap_or_else(|| tool_name.to_string()),
            kind: ToolKind::Think,
            content: str_field(input, "prompt")
                .map(|prompt| vec![text_content(prompt)])
                .unwrap_or_default(),
            locations: Vec::new(),
        },

        "NotebookRead" => {
            let notebook = str_field(input, "notebook_path");
            ToolInfo {
                title: notebook
                    .map(|p| format!("Read Notebook {}", p))
                    .unwrap_or_else(|| "Read Notebook".to_string()),
                kind: ToolKind::Read,
                content: Vec::new(),
                locations: notebook.map(|p| vec![location(p)]).unwrap_or_default(),
            }
        }

        "NotebookEdit" => {
            let notebook = str_field(input, "notebook_path");
            ToolInfo {
                title: notebook
                    .map(|p| format!("Edit Notebook {}", p))
                    .unwrap_or_else(|| "Edit Notebook".to_string()),
                kind: ToolKind::Edit,
                content: str_field(input, "new_source")
                    .map(|source| vec![text_content(source)])
                    .unwrap_or_default(),
                locations: notebook.map(|p| vec![location(p)]).unwrap_or_default(),
            }
        }

        "Bash" => ToolInfo {
            title: str_field(input, "command")
                .map(|command| format!("`{}`", command.replace('`', "\\`")))
                .unwrap_or_else(|| "Terminal".to_string()),
            kind: ToolKind::Execute,
            content: str_field(input, "description")
                .map(|d| vec![text_content(d)])
                .unwrap_or_default(),
            locations: Vec::new(),
        },

        "BashOutput" | "TaskOutput" => ToolInfo {
            title: "Tail Logs".to_string(),
            kind: ToolKind::Execute,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "KillShell" | "KillBash" | "TaskStop" => ToolInfo {
            title: "Kill Process".to_string(),
            kind: ToolKind::Execute,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "Read" => {
            let file_path = path_field(input);
            let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(0);
            let range = match input.get("limit").and_then(|v| v.as_u64()) {
                Some(limit) => format!(" ({} - {})", offset + 1, offset + limit),
                None if offset > 0 => format!(" (from line {})", offset + 1),
                None => String::new(),
            };
            ToolInfo {
                title: format!("Read {}{}", file_path.unwrap_or("File"), range),
                kind: ToolKind::Read,
                content: Vec::new(),
                locations: file_path
                    .map(|p| vec![location_at(p, offset as u32)])
                    .unwrap_or_default(),
            }
        }

        "LS" => ToolInfo {
            title: match str_field(input, "path") {
                Some(path) => format!("List the `{}` directory's contents", path),
                None => "List the current directory's contents".to_string(),
            },
            kind: ToolKind::Search,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "ListMcpResources" => ToolInfo {
            title: str_field(input, "server")
                .map(|server| format!("List MCP resources from {}", server))
                .unwrap_or_else(|| "List MCP resources".to_string()),
            kind: ToolKind::Search,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "ReadMcpResource" => ToolInfo {
            title: match (str_field(input, "server"), str_field(input, "uri")) {
                (Some(server), Some(uri)) => {
                    format!("Read MCP resource {} from {}", uri, server)
                }
                _ => "Read MCP resource".to_string(),
            },
            kind: ToolKind::Read,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "Edit" => {
            let path = path_field(input);
            ToolInfo {
                title: path
                    .map(|p| format!("Edit `{}`", p))
                    .unwrap_or_else(|| "Edit".to_string()),
                kind: ToolKind::Edit,
                content: path
                    .map(|p| {
                        let mut diff = Diff::new(
                            PathBuf::from(p),
                            str_field(input, "new_string")
                                .unwrap_or_default()
                                .to_string(),
                        );
                        diff.old_text = str_field(input, "old_string").map(|s| s.to_string());
                        vec![ToolCallContent::Diff(diff)]
                    })
                    .unwrap_or_default(),
                locations: path.map(|p| vec![location(p)]).unwrap_or_default(),
            }
        }

        "Write" => {
            let path = path_field(input);
            let content = match (path, str_field(input, "content")) {
                (Some(p), content) => vec![ToolCallContent::Diff(Diff::new(
                    PathBuf::from(p),
                    content.unwrap_or_default().to_string(),
                ))],
                (None, Some(content)) => vec![text_content(content)],
                (None, None) => Vec::new(),
            };
            ToolInfo {
                title: path
                    .map(|p| format!("Write {}", p))
                    .unwrap_or_else(|| "Write".to_string()),
                kind: ToolKind::Edit,
                content,
                locations: path.map(|p| vec![location(p)]).unwrap_or_default(),
            }
        }

        "RewindFiles" => {
            let target = str_field(input, "user_message_id");
            let dry_run = input
                .get("dry_run")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            ToolInfo {
                title: match (target, dry_run) {
                    (Some(id), true) => format!("Preview rewind to {}", id),
                    (Some(id), false) => format!("Rewind files to {}", id),
                    (None, _) => "Rewind files".to_string(),
                },
                kind: ToolKind::Edit,
                content: Vec::new(),
                locations: Vec::new(),
            }
        }

        "Glob" => {
            let mut label = "Find".to_string();
            if let Some(path) = str_field(input, "path") {
                label.push_str(&format!(" `{}`", path));
            }
            if let Some(pattern) = str_field(input, "pattern") {
                label.push_str(&format!(" `{}`", pattern));
            }
            ToolInfo {
                title: label,
                kind: ToolKind::Search,
                content: Vec::new(),
                locations: str_field(input, "path")
                    .map(|p| vec![location(p)])
                    .unwrap_or_default(),
            }
        }

        "Grep" => ToolInfo {
            title: grep_label(input),
            kind: ToolKind::Search,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "WebFetch" => ToolInfo {
            title: str_field(input, "url")
                .map(|url| format!("Fetch {}", url))
                .unwrap_or_else(|| "Fetch".to_string()),
            kind: ToolKind::Fetch,
            content: str_field(input, "prompt")
                .map(|prompt| vec![text_content(prompt)])
                .unwrap_or_default(),
            locations: Vec::new(),
        },

        "WebSearch" => {
            let mut label = format!("\"{}\"", str_field(input, "query").unwrap_or_default());
            if let Some(allowed) = input.get("allowed_domains").and_then(|v| v.as_array()) {
                if !allowed.is_empty() {
                    label.push_str(&format!(" (allowed: {})", join_strings(allowed)));
                }
            }
            if let Some(blocked) = input.get("blocked_domains").and_then(|v| v.as_array()) {
                if !blocked.is_empty() {
                    label.push_str(&format!(" (blocked: {})", join_strings(blocked)));
                }
            }
            ToolInfo {
                title: label,
                kind: ToolKind::Fetch,
                content: Vec::new(),
                locations: Vec::new(),
            }
        }

        "TodoWrite" => ToolInfo {
            title: match input.get("todos").and_then(|v| v.as_array()) {
                Some(todos) => format!(
                    "Update TODOs: {}",
                    todos
                        .iter()
                        .filter_map(|todo| todo.get("content").and_then(|c| c.as_str()))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                None => "Update TODOs".to_string(),
            },
            kind: ToolKind::Think,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "ExitPlanMode" => ToolInfo {
            title: "Ready to code?".to_string(),
            kind: ToolKind::SwitchMode,
            content: str_field(input, "plan")
                .map(|plan| vec![text_content(plan)])
                .unwrap_or_default(),
            locations: Vec::new(),
        },

        "AskUserQuestion" => ToolInfo {
            title: match input.get("questions").and_then(|v| v.as_array()) {
                Some(questions) if !questions.is_empty() => format!(
                    "Ask user: {}",
                    questions
                        .iter()
                        .filter_map(|q| {
                            q.get("header")
                                .and_then(|h| h.as_str())
                                .filter(|h| !h.is_empty())
                                .or_else(|| q.get("question").and_then(|v| v.as_str()))
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                _ => "Ask user question".to_string(),
            },
            kind: ToolKind::Think,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "Config" => ToolInfo {
            title: "Update configuration".to_string(),
            kind: ToolKind::SwitchMode,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "SlashCommand" => ToolInfo {
            title: str_field(input, "command")
                .map(|command| format!("Run {}", command))
                .unwrap_or_else(|| "Run Slash Command".to_string()),
            kind: ToolKind::Execute,
            content: Vec::new(),
            locations: Vec::new(),
        },

        "Skill" => ToolInfo {
            title: str_field(input, "name")
                .map(|name| format!("Run skill {}", name))
                .unwrap_or_else(|| "Run Skill".to_string()),
            kind: ToolKind::Execute,
            content: Vec::new(),
            locations: Vec::new(),
        },

        _ => ToolInfo {
            title: tool_name.to_string(),
            kind: ToolKind::Other,
            content: Vec::new(),
            locations: Vec::new(),
        },
    }
}

/// Reconstruct a grep-style command line from the tool input.
fn grep_label(input: &Value) -> String {
    let mut label = "grep".to_string();

    if input.get("-i").and_then(|v| v.as_bool()).unwrap_or(false) {
        label.push_str(" -i");
    }
    if input.get("-n").and_then(|v| v.as_bool()).unwrap_or(false) {
        label.push_str(" -n");
    }
    for flag in ["-A", "-B", "-C"] {
        if let Some(value) = input.get(flag).and_then(|v| v.as_u64()) {
            label.push_str(&format!(" {} {}", flag, value));
        }
    }
    match str_field(input, "output_mode") {
        Some("FilesWithMatches") => label.push_str(" -l"),
        Some("Count") => label.push_str(" -c"),
        _ => {}
    }
    if let Some(head) = input.get("head_limit").and_then(|v| v.as_u64()) {
        label.push_str(&format!(" | head -{}", head));
    }
    if let Some(glob) = str_field(input, "glob") {
        label.push_str(&format!(" --include=\"{}\"", glob));
    }
    if let Some(file_type) = str_field(input, "type") {
        label.push_str(&format!(" --type={}", file_type));
    }
    if input
        .get("multiline")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        label.push_str(" -P");
    }
    if let Some(pattern) = str_field(input, "pattern") {
        label.push_str(&format!(" \"{}\"", pattern));
    }
    if let Some(path) = str_field(input, "path") {
        label.push_str(&format!(" {}", path));
    }

    label
}

fn join_strings(values: &[Value]) -> String {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_tool_name_strips_client_prefix() {
        assert_eq!(base_tool_name("mcp__acp__Read"), "Read");
        assert_eq!(base_tool_name("Read"), "Read");
        assert_eq!(base_tool_name("mcp__other__Read"), "mcp__other__Read");
    }

    #[test]
    fn test_subagent_and_plan_tool_sets() {
        assert!(is_subagent_launcher("Task"));
        assert!(is_subagent_launcher("mcp__acp__Agent"));
        assert!(!is_subagent_launcher("Bash"));
        assert!(is_plan_tool("TodoWrite"));
        assert!(is_plan_tool("mcp__acp__TodoWrite"));
        assert!(is_edit_tool("mcp__acp__Write"));
        assert!(is_edit_tool("Edit"));
        assert!(!is_edit_tool("Read"));
    }

    #[test]
    fn test_bash_title_escapes_backticks() {
        let info = tool_info("Bash", &json!({"command": "echo `date`"}));
        assert_eq!(info.title, "`echo \\`date\\``");
        assert_eq!(info.kind, ToolKind::Execute);
    }

    #[test]
    fn test_read_title_with_range() {
        let info = tool_info(
            "mcp__acp__Read",
            &json!({"file_path": "src/main.rs", "offset": 10, "limit": 20}),
        );
        assert_eq!(info.title, "Read src/main.rs (11 - 30)");
        assert_eq!(info.locations.len(), 1);
        assert_eq!(info.locations[0].line, Some(10));

        let info = tool_info("Read", &json!({"path": "a.txt", "offset": 5}));
        assert_eq!(info.title, "Read a.txt (from line 6)");
    }

    #[test]
    fn test_edit_produces_diff_content() {
        let info = tool_info(
            "Edit",
            &json!({"file_path": "lib.rs", "old_string": "a", "new_string": "b"}),
        );
        assert_eq!(info.title, "Edit `lib.rs`");
        assert_eq!(info.kind, ToolKind::Edit);
        match &info.content[0] {
            ToolCallContent::Diff { diff } => {
                assert_eq!(diff.old_text.as_deref(), Some("a"));
                assert_eq!(diff.new_text, "b");
            }
            other => panic!("Expected diff content, got {:?}", other),
        }
    }

    #[test]
    fn test_write_produces_creation_diff() {
        let info = tool_info("Write", &json!({"file_path": "new.rs", "content": "fn x() {}"}));
        match &info.content[0] {
            ToolCallContent::Diff { diff } => {
                assert!(diff.old_text.is_none());
                assert_eq!(diff.new_text, "fn x() {}");
            }
            other => panic!("Expected diff content, got {:?}", other),
        }
    }

    #[test]
    fn test_grep_label_reconstruction() {
        let info = tool_info(
            "Grep",
            &json!({
                "-i": true,
                "-C": 2,
                "output_mode": "FilesWithMatches",
                "glob": "*.rs",
                "pattern": "fn main",
                "path": "src"
            }),
        );
        assert_eq!(
            info.title,
            "grep -i -C 2 -l --include=\"*.rs\" \"fn main\" src"
        );
        assert_eq!(info.kind, ToolKind::Search);
    }

    #[test]
    fn test_exit_plan_mode_info() {
        let info = tool_info("ExitPlanMode", &json!({"plan": "1. do things"}));
        assert_eq!(info.title, "Ready to code?");
        assert_eq!(info.kind, ToolKind::SwitchMode);
        assert_eq!(info.kind.to_acp_kind(), agent_client_protocol::ToolKind::Other);
        assert_eq!(info.content.len(), 1);
    }

    #[test]
    fn test_task_uses_description_and_prompt() {
        let info = tool_info(
            "Task",
            &json!({"description": "Explore the repo", "prompt": "look at everything"}),
        );
        assert_eq!(info.title, "Explore the repo");
        assert_eq!(info.kind, ToolKind::Think);
        assert_eq!(info.content.len(), 1);
    }

    #[test]
    fn test_ask_user_question_title_prefers_headers() {
        let info = tool_info(
            "AskUserQuestion",
            &json!({"questions": [
                {"question": "Which database?", "header": "Database"},
                {"question": "Which region?"}
            ]}),
        );
        assert_eq!(info.title, "Ask user: Database, Which region?");
    }

    #[test]
    fn test_unknown_tool_falls_back() {
        let info = tool_info("Teleport", &json!({}));
        assert_eq!(info.title, "Teleport");
        assert_eq!(info.kind, ToolKind::Other);
    }

    #[test]
    fn test_web_search_label() {
        let info = tool_info(
            "WebSearch",
            &json!({"query": "rust acp", "allowed_domains": ["docs.rs"]}),
        );
        assert_eq!(info.title, "\"rust acp\" (allowed: docs.rs)");
        assert_eq!(info.kind, ToolKind::Fetch);
    }
}
