//! Backend event model
//!
//! The agent backend emits an ordered stream of JSON events per conversation.
//! This module models that stream as a closed tagged union: the translator's
//! dispatch is a total match over [`SdkEvent`], and an event whose tag is not
//! in the union fails deserialization — an unrecognized top-level variant is a
//! contract violation, not something to paper over.
//!
//! Items inside message content arrays are weaker: shapes there vary by tool
//! and SDK version, so [`parse_content_item`] coerces anything it cannot
//! decode into a textual fallback instead of failing the whole event.

use crate::config::PermissionMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from the backend stream, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkEvent {
    System(SystemEvent),
    StreamEvent(StreamEvent),
    Assistant(AssistantEvent),
    User(UserEvent),
    ToolProgress(ToolProgressEvent),
    ToolUseSummary(ToolUseSummaryEvent),
    AuthStatus(AuthStatusEvent),
    Result(ResultEvent),
}

/// Lifecycle and housekeeping events, tagged by `subtype`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SystemEvent {
    Init(InitEvent),
    CompactBoundary {
        compact_metadata: CompactMetadata,
    },
    HookStarted(HookEvent),
    HookProgress(HookEvent),
    HookResponse(HookEvent),
    TaskNotification(TaskNotification),
    Status(StatusEvent),
    FilesPersisted(FilesPersistedEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitEvent {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    pub output_style: Option<String>,
    #[serde(default)]
    pub available_output_styles: Vec<String>,
    #[serde(default)]
    pub slash_commands: Vec<SlashCommandInfo>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub mcp_servers: Option<Value>,
    pub api_key_source: Option<String>,
    pub agent_version: Option<String>,
}

/// A slash command advertised by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommandInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "argument_hint", alias = "argumentHint")]
    pub argument_hint: Option<ArgumentHint>,
}

/// Argument hints arrive as either a single string or a list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentHint {
    One(String),
    Many(Vec<String>),
}

impl ArgumentHint {
    pub fn as_hint(&self) -> String {
        match self {
            ArgumentHint::One(hint) => hint.clone(),
            ArgumentHint::Many(parts) => parts.join(" "),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompactMetadata {
    pub trigger: String,
    #[serde(default)]
    pub pre_tokens: u64,
}

/// Shared payload for hook_started / hook_progress / hook_response.
#[derive(Debug, Clone, Deserialize)]
pub struct HookEvent {
    pub hook_name: String,
    pub hook_event: Option<String>,
    pub hook_id: Option<String>,
    pub outcome: Option<String>,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl HookEvent {
    /// Best available human text for this hook event.
    pub fn display_output(&self) -> Option<&str> {
        [&self.output, &self.stdout, &self.stderr]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .find(|s| !s.is_empty())
    }
}

/// Terminal status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }
}

/// Out-of-band terminal status report for a background task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskNotification {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub output_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusEvent {
    pub status: Option<String>,
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesPersistedEvent {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    pub processed_at: Option<String>,
}

/// A partial-message streaming frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    pub event: BlockEvent,
    pub parent_tool_use_id: Option<String>,
}

/// Content-block framing inside a streamed message.
///
/// Start and delta frames carry the raw block payload; they are translated
/// with the same content mapping as complete messages. Stop and message-level
/// framing produce no client output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockEvent {
    ContentBlockStart { content_block: Value },
    ContentBlockDelta { delta: Value },
    ContentBlockStop {},
    MessageStart {},
    MessageDelta {},
    MessageStop {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEvent {
    pub message: SdkMessage,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEvent {
    pub message: SdkMessage,
    pub parent_tool_use_id: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdkMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
    pub model: Option<String>,
}

/// Message content is either one plain string or an array of blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolProgressEvent {
    pub tool_use_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub elapsed_time_seconds: f64,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolUseSummaryEvent {
    pub summary: String,
    #[serde(default)]
    pub preceding_tool_use_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthStatusEvent {
    #[serde(default)]
    pub output: Vec<String>,
    pub error: Option<String>,
    #[serde(default, rename = "isAuthenticating")]
    pub is_authenticating: bool,
}

/// Why the turn ended, from the result event's `subtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    ErrorDuringExecution,
    ErrorMaxTurns,
    ErrorMaxBudgetUsd,
    ErrorMaxStructuredOutputRetries,
}

impl ResultSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSubtype::Success => "success",
            ResultSubtype::ErrorDuringExecution => "error_during_execution",
            ResultSubtype::ErrorMaxTurns => "error_max_turns",
            ResultSubtype::ErrorMaxBudgetUsd => "error_max_budget_usd",
            ResultSubtype::ErrorMaxStructuredOutputRetries => {
                "error_max_structured_output_retries"
            }
        }
    }
}

/// Terminal event closing a turn. Raw diagnostic fields are retained as
/// opaque JSON for pass-through to the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    pub subtype: ResultSubtype,
    #[serde(default)]
    pub is_error: bool,
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub usage: Option<Value>,
    #[serde(rename = "modelUsage")]
    pub model_usage: Option<Value>,
    pub stop_reason: Option<String>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub permission_denials: Option<Value>,
    pub structured_output: Option<Value>,
}

/// One decoded item from a message content array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentChunk {
    Text {
        text: String,
    },
    TextDelta {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    RedactedThinking {},
    Image {
        source: ImageSource,
    },
    #[serde(alias = "server_tool_use", alias = "mcp_tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(
        alias = "mcp_tool_result",
        alias = "tool_search_tool_result",
        alias = "web_fetch_tool_result",
        alias = "web_search_tool_result",
        alias = "code_execution_tool_result",
        alias = "bash_code_execution_tool_result",
        alias = "text_editor_code_execution_tool_result"
    )]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        is_error: Option<bool>,
    },
    Document {
        title: Option<String>,
    },
    SearchResult {
        title: Option<String>,
        source: Option<String>,
    },
    #[serde(alias = "compaction_delta")]
    Compaction {
        content: Option<String>,
    },
    ContainerUpload {
        file_id: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    CitationsDelta {},
    SignatureDelta {},
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
}

/// Decode one content array item, coercing undecodable shapes to text.
pub fn parse_content_item(value: &Value) -> ContentChunk {
    match serde_json::from_value::<ContentChunk>(value.clone()) {
        Ok(chunk) => chunk,
        Err(err) => {
            tracing::warn!("Coercing unrecognized content item to text: {}", err);
            ContentChunk::Text {
                text: value.to_string(),
            }
        }
    }
}

// Input direction: user messages written to the backend.

#[derive(Debug, Clone, Serialize)]
pub struct SdkUserMessage {
    pub r#type: String,
    pub message: UserPayload,
    pub session_id: String,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPayload {
    pub role: String,
    pub content: Vec<UserContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSourcePayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSourcePayload {
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SdkUserMessage {
    pub fn new(session_id: impl Into<String>, content: Vec<UserContentBlock>) -> Self {
        Self {
            r#type: "user".to_string(),
            message: UserPayload {
                role: "user".to_string(),
                content,
            },
            session_id: session_id.into(),
            parent_tool_use_id: None,
        }
    }

    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            vec![UserContentBlock::Text { text: text.into() }],
        )
    }
}
