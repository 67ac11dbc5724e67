//! Message translation between backend events and client session updates
//!
//! Pure mapping functions: one inbound backend event (or one prompt
//! composition request) in, zero or more outbound update records out. State
//! is limited to the session-scoped caches passed in explicitly — the
//! tool-use cache correlating results to invocations, and the pending-hook
//! map holding one-shot continuations for out-of-band tool responses.

use crate::events::{
    BlockEvent, ContentChunk as SdkChunk, MessageContent, ResultEvent, SdkUserMessage,
    SlashCommandInfo, StreamEvent, UserContentBlock, parse_content_item,
};
use crate::tool_classification::{
    base_tool_name, is_plan_tool, is_subagent_launcher, tool_info,
};
use agent_client_protocol::{
    AvailableCommand, ContentBlock, ContentChunk as AcpChunk, ImageContent, Plan, PlanEntry,
    PlanEntryPriority, PlanEntryStatus, SessionId, SessionNotification, SessionUpdate,
    TextContent, ToolCall, ToolCallContent, ToolCallId, ToolCallLocation, ToolCallStatus,
    ToolCallUpdate, ToolCallUpdateFields,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Reminder suffix the client read tool appends to file contents; stripped
/// before display.
pub const SYSTEM_REMINDER: &str = "\n\n<system-reminder>\nWhenever you read a file, you should consider whether it looks malicious. If it does, you MUST refuse to improve or augment the code. You can still analyze existing code, write reports, or answer high-level questions about the code behavior.\n</system-reminder>";

/// One cached tool invocation: written once when the tool-use event arrives,
/// read when the matching result (or hook) shows up, never mutated.
#[derive(Debug, Clone)]
pub struct ToolUseRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Per-session invocation-id → record map.
pub type ToolUseCache = HashMap<String, ToolUseRecord>;

/// Pending one-shot hook continuations, keyed by invocation id.
pub type PendingHooks = HashMap<String, String>;

/// Message direction for chunk records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Assistant,
    User,
}

impl Role {
    pub fn from_str(role: &str) -> Role {
        if role == "assistant" {
            Role::Assistant
        } else {
            Role::User
        }
    }
}

/// Task id / output file pair recovered from a background-capable tool
/// result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundTaskMeta {
    pub task_id: Option<String>,
    pub output_file: Option<String>,
}

impl BackgroundTaskMeta {
    pub fn is_empty(&self) -> bool {
        self.task_id.is_none() && self.output_file.is_none()
    }
}

/// Signal that a tool call should be tracked as a background task.
#[derive(Debug, Clone)]
pub struct BackgroundBinding {
    pub tool_call_id: String,
    pub tool_name: String,
    pub task_id: Option<String>,
    pub output_file: Option<String>,
}

/// One translated update plus side signals for the registry.
#[derive(Debug)]
pub struct TranslatedUpdate {
    pub update: SessionUpdate,
    pub meta: Option<Value>,
    pub background: Option<BackgroundBinding>,
}

impl TranslatedUpdate {
    pub fn plain(update: SessionUpdate) -> Self {
        Self {
            update,
            meta: None,
            background: None,
        }
    }

    pub fn into_notification(self, session_id: &SessionId) -> SessionNotification {
        let mut notification = SessionNotification::new(session_id.clone(), self.update);
        notification.meta = self.meta.and_then(|v| v.as_object().cloned());
        notification
    }
}

/// Per-message translation context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentCx<'a> {
    pub role: Role,
    pub parent_tool_use_id: Option<&'a str>,
    /// Disabled when replaying persisted history.
    pub register_hooks: bool,
}

impl Default for Role {
    fn default() -> Self {
        Role::Assistant
    }
}

/// Context describing a tool call launched from inside a subagent.
#[derive(Debug, Clone)]
pub struct SubagentContext {
    pub parent_tool_use_id: String,
    pub subagent_type: Option<String>,
    pub label: String,
}

/// Resolve the subagent context for a parent tool-use id, if any.
///
/// A parent id whose invocation was never cached still gets a generic
/// label; a cached parent that is not a subagent launcher yields none.
pub fn resolve_subagent_context(
    parent_tool_use_id: Option<&str>,
    cache: &ToolUseCache,
) -> Option<SubagentContext> {
    let parent_id = parent_tool_use_id?;
    let Some(parent) = cache.get(parent_id) else {
        return Some(SubagentContext {
            parent_tool_use_id: parent_id.to_string(),
            subagent_type: None,
            label: format!("subagent#{}", parent_id),
        });
    };

    if !is_subagent_launcher(&parent.name) {
        return None;
    }

    let subagent_type = parent
        .input
        .get("subagent_type")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let label = format!(
        "{}#{}",
        subagent_type.as_deref().unwrap_or("subagent"),
        parent_id
    );
    Some(SubagentContext {
        parent_tool_use_id: parent_id.to_string(),
        subagent_type,
        label,
    })
}

/// Prefix a title with the subagent label: `[label] title`.
pub fn prefix_title(title: &str, context: Option<&SubagentContext>) -> String {
    match context {
        None => title.to_string(),
        Some(context) if title.is_empty() => format!("[{}]", context.label),
        Some(context) => format!("[{}] {}", context.label, title),
    }
}

fn text_block(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text(TextContent::new(text))
}

fn message_chunk(role: Role, content: ContentBlock) -> SessionUpdate {
    let chunk = AcpChunk::new(content);
    match role {
        Role::Assistant => SessionUpdate::AgentMessageChunk(chunk),
        Role::User => SessionUpdate::UserMessageChunk(chunk),
    }
}

/// Thought chunks are always agent-side.
pub fn thought_chunk(text: impl Into<String>) -> SessionUpdate {
    SessionUpdate::AgentThoughtChunk(AcpChunk::new(text_block(text)))
}

/// Translate one complete message body.
pub fn translate_content(
    content: &MessageContent,
    cx: ContentCx<'_>,
    cache: &mut ToolUseCache,
    pending_hooks: &mut PendingHooks,
) -> Vec<TranslatedUpdate> {
    match content {
        MessageContent::Text(text) => vec![TranslatedUpdate::plain(message_chunk(
            cx.role,
            text_block(text.clone()),
        ))],
        MessageContent::Blocks(items) => translate_blocks(items, cx, cache, pending_hooks),
    }
}

/// Translate a content array item-by-item.
pub fn translate_blocks(
    items: &[Value],
    cx: ContentCx<'_>,
    cache: &mut ToolUseCache,
    pending_hooks: &mut PendingHooks,
) -> Vec<TranslatedUpdate> {
    let subagent = resolve_subagent_context(cx.parent_tool_use_id, cache);
    let mut output = Vec::new();
    for item in items {
        let chunk = parse_content_item(item);
        if let Some(update) = translate_chunk(chunk, cx, cache, pending_hooks, subagent.as_ref()) {
            output.push(update);
        }
    }
    output
}

/// Translate one streamed partial-content frame.
///
/// Block-start and block-delta frames reuse the complete-message mapping,
/// parameterized by the partial payload; stop and message framing produce
/// nothing.
pub fn translate_stream_event(
    stream: &StreamEvent,
    cache: &mut ToolUseCache,
    pending_hooks: &mut PendingHooks,
) -> Vec<TranslatedUpdate> {
    let cx = ContentCx {
        role: Role::Assistant,
        parent_tool_use_id: stream.parent_tool_use_id.as_deref(),
        register_hooks: true,
    };
    match &stream.event {
        BlockEvent::ContentBlockStart { content_block } => {
            translate_blocks(std::slice::from_ref(content_block), cx, cache, pending_hooks)
        }
        BlockEvent::ContentBlockDelta { delta } => {
            translate_blocks(std::slice::from_ref(delta), cx, cache, pending_hooks)
        }
        BlockEvent::ContentBlockStop {}
        | BlockEvent::MessageStart {}
        | BlockEvent::MessageDelta {}
        | BlockEvent::MessageStop {} => Vec::new(),
    }
}

fn translate_chunk(
    chunk: SdkChunk,
    cx: ContentCx<'_>,
    cache: &mut ToolUseCache,
    pending_hooks: &mut PendingHooks,
    subagent: Option<&SubagentContext>,
) -> Option<TranslatedUpdate> {
    match chunk {
        SdkChunk::Text { text } | SdkChunk::TextDelta { text } => Some(TranslatedUpdate::plain(
            message_chunk(cx.role, text_block(text)),
        )),

        SdkChunk::Thinking { thinking } | SdkChunk::ThinkingDelta { thinking } => {
            Some(TranslatedUpdate::plain(thought_chunk(thinking)))
        }

        SdkChunk::RedactedThinking {} => {
            Some(TranslatedUpdate::plain(thought_chunk("[redacted thinking]")))
        }

        SdkChunk::Image { source } => {
            let block = if source.kind == "base64" {
                ContentBlock::Image(ImageContent::new(
                    source.data.unwrap_or_default(),
                    source.media_type.unwrap_or_default(),
                ))
            } else {
                let mut image = ImageContent::new(String::new(), String::new());
                image.uri = source.url;
                ContentBlock::Image(image)
            };
            Some(TranslatedUpdate::plain(message_chunk(cx.role, block)))
        }

        SdkChunk::ToolUse { id, name, input } => {
            cache.insert(
                id.clone(),
                ToolUseRecord {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                },
            );

            if is_plan_tool(&name) {
                // Plan updates replace the tool-call record entirely.
                return plan_from_todos(&input)
                    .map(|plan| TranslatedUpdate::plain(SessionUpdate::Plan(plan)));
            }

            if cx.register_hooks {
                pending_hooks.insert(id.clone(), name.clone());
            }

            let info = tool_info(&name, &input);
            let title = prefix_title(&info.title, subagent);
            let meta = json!({
                "claudeCode": {
                    "toolName": name,
                    "parentToolUseId": subagent.map(|s| s.parent_tool_use_id.clone()),
                    "subagentType": subagent.and_then(|s| s.subagent_type.clone()),
                    "subagentLabel": subagent.map(|s| s.label.clone()),
                }
            });
            Some(TranslatedUpdate {
                update: SessionUpdate::ToolCall({
                    let mut tool_call = ToolCall::new(ToolCallId::new(id.as_str()), title);
                    tool_call.kind = info.kind.to_acp_kind();
                    tool_call.status = ToolCallStatus::Pending;
                    tool_call.content = info.content;
                    tool_call.locations = info.locations;
                    tool_call.raw_input = Some(input);
                    tool_call
                }),
                meta: Some(meta),
                background: None,
            })
        }

        SdkChunk::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let Some(record) = cache.get(&tool_use_id) else {
                tracing::warn!(
                    "Got a tool result for tool use that wasn't tracked: {}",
                    tool_use_id
                );
                return None;
            };
            if is_plan_tool(&record.name) {
                return None;
            }

            let is_error = is_error.unwrap_or(false);
            let background_capable = is_subagent_launcher(&record.name)
                && record
                    .input
                    .get("run_in_background")
                    .map(value_is_truthy)
                    .unwrap_or(false);
            let task_meta = if background_capable {
                extract_background_metadata(&content)
            } else {
                BackgroundTaskMeta::default()
            };

            let status = if is_error {
                ToolCallStatus::Failed
            } else if background_capable {
                // The real work is still running; a later terminal signal
                // completes the call.
                ToolCallStatus::InProgress
            } else {
                ToolCallStatus::Completed
            };

            let result_update = tool_result_update(&record.name, &content, is_error);
            let title = result_update
                .title
                .map(|title| prefix_title(&title, subagent));

            let meta = json!({
                "claudeCode": {
                    "toolName": record.name.clone(),
                    "parentToolUseId": subagent.map(|s| s.parent_tool_use_id.clone()),
                    "subagentType": subagent.and_then(|s| s.subagent_type.clone()),
                    "subagentLabel": subagent.map(|s| s.label.clone()),
                    "backgroundTaskId": task_meta.task_id.clone(),
                    "backgroundOutputFile": task_meta.output_file.clone(),
                }
            });
            let background = if background_capable && !task_meta.is_empty() {
                Some(BackgroundBinding {
                    tool_call_id: tool_use_id.clone(),
                    tool_name: record.name.clone(),
                    task_id: task_meta.task_id.clone(),
                    output_file: task_meta.output_file.clone(),
                })
            } else {
                None
            };

            Some(TranslatedUpdate {
                update: SessionUpdate::ToolCallUpdate(ToolCallUpdate::new(
                    ToolCallId::new(tool_use_id.as_str()),
                    {
                        let mut fields = ToolCallUpdateFields::new();
                        fields.status = Some(status);
                        fields.title = title;
                        fields.content = result_update.content;
                        fields.locations = result_update.locations;
                        fields.raw_output = Some(content);
                        fields
                    },
                )),
                meta: Some(meta),
                background,
            })
        }

        SdkChunk::Document { title } => {
            let text = match title.filter(|t| !t.is_empty()) {
                Some(title) => format!("[document] {}", title),
                None => "[document]".to_string(),
            };
            Some(TranslatedUpdate::plain(message_chunk(
                cx.role,
                text_block(text),
            )))
        }

        SdkChunk::SearchResult { title, source } => {
            let title = title.unwrap_or_else(|| "Result".to_string());
            let source = source
                .filter(|s| !s.is_empty())
                .map(|s| format!(" ({})", s))
                .unwrap_or_default();
            Some(TranslatedUpdate::plain(message_chunk(
                cx.role,
                text_block(format!("[search] {}{}", title, source)),
            )))
        }

        SdkChunk::Compaction { content } => content
            .filter(|c| !c.is_empty())
            .map(|c| TranslatedUpdate::plain(thought_chunk(c))),

        SdkChunk::ContainerUpload { file_id } => Some(TranslatedUpdate::plain(message_chunk(
            cx.role,
            text_block(format!("Container upload: {}", file_id)),
        ))),

        SdkChunk::InputJsonDelta { .. }
        | SdkChunk::CitationsDelta {}
        | SdkChunk::SignatureDelta {} => None,
    }
}

fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Null => false,
        _ => true,
    }
}

/// Field updates derived from a tool result.
#[derive(Debug, Default)]
struct ResultUpdate {
    title: Option<String>,
    content: Option<Vec<ToolCallContent>>,
    locations: Option<Vec<ToolCallLocation>>,
}

fn tool_result_update(tool_name: &str, content: &Value, is_error: bool) -> ResultUpdate {
    if is_error && !content.is_null() {
        return ResultUpdate {
            content: generic_result_content(content, true),
            ..Default::default()
        };
    }

    match base_tool_name(tool_name) {
        "Read" => {
            let mut blocks = Vec::new();
            match content {
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                            blocks.push(ToolCallContent::Content(Content::new(text_block(
                                markdown_escape(&text.replace(SYSTEM_REMINDER, "")),
                            ))));
                        }
                    }
                }
                Value::String(text) if !text.is_empty() => {
                    blocks.push(ToolCallContent::Content(Content::new(text_block(
                        markdown_escape(&text.replace(SYSTEM_REMINDER, "")),
                    ))));
                }
                _ => {}
            }
            ResultUpdate {
                content: (!blocks.is_empty()).then_some(blocks),
                ..Default::default()
            }
        }

        // The diff hint was attached at tool-call creation from the input;
        // result bodies for these carry nothing the client needs.
        "Edit" | "Write" | "Bash" => ResultUpdate::default(),

        "ExitPlanMode" => ResultUpdate {
            title: Some("Exited Plan Mode".to_string()),
            ..Default::default()
        },

        _ => ResultUpdate {
            content: generic_result_content(content, is_error),
            ..Default::default()
        },
    }
}

fn generic_result_content(content: &Value, is_error: bool) -> Option<Vec<ToolCallContent>> {
    match content {
        Value::Array(items) if !items.is_empty() => Some(
            items
                .iter()
                .map(|item| ToolCallContent::Content(Content::new(result_block(item, is_error))))
                .collect(),
        ),
        Value::Object(map) if map.contains_key("type") => Some(vec![ToolCallContent::Content(
            Content::new(result_block(content, is_error)),
        )]),
        Value::String(text) if !text.is_empty() => Some(vec![ToolCallContent::Content(
            Content::new(text_block(fence_if(text, is_error))),
        )]),
        _ => None,
    }
}

fn fence_if(text: &str, fence: bool) -> String {
    if fence {
        format!("```\n{}\n```", text)
    } else {
        text.to_string()
    }
}

/// Map one tool-result content item to a client content block. Shapes here
/// are open-ended; anything unrecognized degrades to stringified JSON.
fn result_block(item: &Value, is_error: bool) -> ContentBlock {
    let wrap = |text: String| text_block(fence_if(&text, is_error));

    match item.get("type").and_then(|t| t.as_str()) {
        Some("text") => {
            let text = item.get("text").and_then(|t| t.as_str()).unwrap_or_default();
            text_block(fence_if(text, is_error))
        }
        Some("image") => {
            let source = item.get("source");
            let source_type = source
                .and_then(|s| s.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or_default();
            if source_type == "base64" {
                ContentBlock::Image(ImageContent {
                    data: source
                        .and_then(|s| s.get("data"))
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    mime_type: source
                        .and_then(|s| s.get("media_type"))
                        .and_then(|m| m.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    uri: None,
                    annotations: None,
                    meta: None,
                })
            } else if let Some(url) = source
                .and_then(|s| s.get("url"))
                .and_then(|u| u.as_str())
            {
                wrap(format!("[image: {}]", url))
            } else {
                wrap("[image: file reference]".to_string())
            }
        }
        Some("web_search_result") => {
            let title = item.get("title").and_then(|t| t.as_str()).unwrap_or("Result");
            let url = item.get("url").and_then(|u| u.as_str()).unwrap_or_default();
            wrap(format!("{} ({})", title, url))
        }
        Some("tool_reference") => wrap(format!(
            "Tool: {}",
            item.get("tool_name").and_then(|n| n.as_str()).unwrap_or("unknown")
        )),
        _ => wrap(item.to_string()),
    }
}

/// Fence text in backticks, sized past any backtick run the text contains.
pub fn markdown_escape(text: &str) -> String {
    let mut escape = "```".to_string();
    for line in text.lines() {
        let run = line.chars().take_while(|c| *c == '`').count();
        while run >= escape.len() {
            escape.push('`');
        }
    }
    let trailing_newline = if text.ends_with('\n') { "" } else { "\n" };
    format!("{}\n{}{}{}", escape, text, trailing_newline, escape)
}

/// Convert the plan tool's todo list into a structured plan record.
pub fn plan_from_todos(input: &Value) -> Option<Plan> {
    let todos = input.get("todos")?.as_array()?;
    let entries = todos
        .iter()
        .map(|todo| {
            let content = todo
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let status = match todo.get("status").and_then(|s| s.as_str()) {
                Some("in_progress") => PlanEntryStatus::InProgress,
                Some("completed") => PlanEntryStatus::Completed,
                _ => PlanEntryStatus::Pending,
            };
            PlanEntry::new(content, PlanEntryPriority::Medium, status)
        })
        .collect();
    Some(Plan::new(entries))
}

// Background task metadata extraction. Structured fields win; tag markers
// next; free-text heuristics are the last resort and are tested to never
// override structured data.

static TASK_ID_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<task-id>([^<]+)</task-id>").unwrap());
static OUTPUT_FILE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<output-file>([^<]+)</output-file>").unwrap());
static TASK_ID_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)["']task_id["']\s*:\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap());
static TASK_ID_KV: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btask[_\s-]*id\b\s*[:=]\s*([A-Za-z0-9._:-]+)").unwrap());
static TASK_ID_BACKGROUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbackground(?:\s+\w+){0,4}\s+id\b\s*[:=]\s*([A-Za-z0-9._:-]+)").unwrap()
});
static OUTPUT_FILE_KV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["']?output[_\s-]*file["']?\s*[:=]\s*["']?([^\n"']+)["']?"#).unwrap()
});
static OUTPUT_FILE_PROSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\boutput\s+is\s+being\s+written\s+to\s*:\s*([^\n]+)").unwrap());

/// Flatten tool-result content into text for the free-text heuristics.
fn extract_text_from_tool_result(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => {
            if let Some(task_id) = map.get("task_id").and_then(|t| t.as_str()) {
                let output_file = map
                    .get("output_file")
                    .and_then(|o| o.as_str())
                    .map(|o| format!("\noutput_file: {}", o))
                    .unwrap_or_default();
                format!("task_id: {}{}", task_id, output_file)
            } else {
                content.to_string()
            }
        }
        _ => String::new(),
    }
}

/// Recover a task id / output file pair from a tool result.
pub fn extract_background_metadata(content: &Value) -> BackgroundTaskMeta {
    let mut task_id: Option<String> = None;
    let mut output_file: Option<String> = None;

    if let Value::Object(map) = content {
        task_id = map
            .get("task_id")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string());
        output_file = map
            .get("output_file")
            .and_then(|o| o.as_str())
            .map(|o| o.to_string());
    }

    let text = extract_text_from_tool_result(content);

    if task_id.is_none() {
        task_id = TASK_ID_TAG
            .captures(&text)
            .map(|c| c[1].trim().to_string());
    }
    if output_file.is_none() {
        output_file = OUTPUT_FILE_TAG
            .captures(&text)
            .map(|c| c[1].trim().to_string());
    }

    if task_id.is_none() {
        task_id = TASK_ID_JSON
            .captures(&text)
            .or_else(|| TASK_ID_KV.captures(&text))
            .or_else(|| TASK_ID_BACKGROUND.captures(&text))
            .map(|c| c[1].to_string());
    }

    if output_file.is_none() {
        output_file = OUTPUT_FILE_KV
            .captures(&text)
            .or_else(|| OUTPUT_FILE_PROSE.captures(&text))
            .map(|c| c[1].trim().to_string());
    }

    BackgroundTaskMeta {
        task_id,
        output_file,
    }
}

// Usage aggregation.

/// Aggregated token counters for one turn. Each source counter is optional;
/// the total sums whichever were present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_write_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_tokens: Option<u64>,
}

fn counter(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
}

/// Map raw backend usage counters into aggregated usage. Returns `None`
/// when no counter is present at all.
pub fn map_usage(raw: &Value) -> Option<TokenUsage> {
    let map = raw.as_object()?;

    let input_tokens = counter(map.get("input_tokens"));
    let output_tokens = counter(map.get("output_tokens"));
    let cached_read = counter(map.get("cache_read_input_tokens"));
    let cached_write = counter(map.get("cache_creation_input_tokens"));
    let mut thought = counter(map.get("thinking_tokens")).or_else(|| counter(map.get("reasoning_tokens")));
    if thought.is_none() {
        thought = map
            .get("output_tokens_details")
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(|v| counter(Some(v)));
    }

    if input_tokens.is_none()
        && output_tokens.is_none()
        && cached_read.is_none()
        && cached_write.is_none()
        && thought.is_none()
    {
        return None;
    }

    let total = input_tokens.unwrap_or(0)
        + output_tokens.unwrap_or(0)
        + cached_read.unwrap_or(0)
        + cached_write.unwrap_or(0)
        + thought.unwrap_or(0);

    Some(TokenUsage {
        input_tokens: input_tokens.unwrap_or(0),
        output_tokens: output_tokens.unwrap_or(0),
        total_tokens: total,
        cached_read_tokens: cached_read,
        cached_write_tokens: cached_write,
        thought_tokens: thought,
    })
}

/// Largest declared per-model context window, if any.
pub fn context_window_estimate(model_usage: Option<&Value>) -> Option<u64> {
    let map = model_usage?.as_object()?;
    let max = map
        .values()
        .filter_map(|usage| counter(usage.get("contextWindow")))
        .max()
        .unwrap_or(0);
    (max > 0).then_some(max)
}

/// Payload for the usage extension notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageUpdate {
    pub used: u64,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<UsageCost>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageCost {
    pub amount: f64,
    pub currency: String,
}

/// Derive the usage record from a terminal result event.
///
/// The reported context size is the larger of the declared window and the
/// computed total, so usage never exceeds the window estimate.
pub fn usage_update(result: &ResultEvent) -> Option<(TokenUsage, UsageUpdate)> {
    let usage = map_usage(result.usage.as_ref()?)?;
    let window = context_window_estimate(result.model_usage.as_ref());
    let used = usage.total_tokens;
    let size = window.unwrap_or(used).max(used);
    let cost = result
        .total_cost_usd
        .filter(|amount| amount.is_finite())
        .map(|amount| UsageCost {
            amount,
            currency: "USD".to_string(),
        });
    Some((usage, UsageUpdate { used, size, cost }))
}

// Prompt composition.

static MCP_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/mcp:([^:\s]+):(\S+)(\s.*)?$").unwrap());

fn format_uri_as_link(uri: &str) -> String {
    for scheme in ["file://", "zed://"] {
        if let Some(path) = uri.strip_prefix(scheme) {
            let name = path.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or(path);
            return format!("[@{}]({})", name, uri);
        }
    }
    uri.to_string()
}

/// Compose one client prompt into a backend user message.
///
/// Embedded text resources ride along as `<context>` trailer blocks after
/// the visible content; audio has no backend input type and is preserved as
/// a text reference instead of being dropped.
pub fn prompt_to_backend(session_id: &str, prompt: &[ContentBlock]) -> SdkUserMessage {
    let mut content: Vec<UserContentBlock> = Vec::new();
    let mut context: Vec<UserContentBlock> = Vec::new();

    for block in prompt {
        match block {
            ContentBlock::Text(text) => {
                let rewritten = match MCP_COMMAND.captures(&text.text) {
                    Some(captures) => format!(
                        "/{}:{} (MCP){}",
                        &captures[1],
                        &captures[2],
                        captures.get(3).map(|m| m.as_str()).unwrap_or("")
                    ),
                    None => text.text.clone(),
                };
                content.push(UserContentBlock::Text { text: rewritten });
            }
            ContentBlock::ResourceLink(link) => {
                content.push(UserContentBlock::Text {
                    text: format_uri_as_link(&link.uri),
                });
            }
            ContentBlock::Resource(resource) => {
                use agent_client_protocol::EmbeddedResourceResource;
                match &resource.resource {
                    EmbeddedResourceResource::TextResourceContents(text_resource) => {
                        content.push(UserContentBlock::Text {
                            text: format_uri_as_link(&text_resource.uri),
                        });
                        context.push(UserContentBlock::Text {
                            text: format!(
                                "\n<context ref=\"{}\">\n{}\n</context>",
                                text_resource.uri, text_resource.text
                            ),
                        });
                    }
                    EmbeddedResourceResource::BlobResourceContents(blob_resource) => {
                        content.push(UserContentBlock::Text {
                            text: format_uri_as_link(&blob_resource.uri),
                        });
                    }
                }
            }
            ContentBlock::Image(image) => {
                if !image.data.is_empty() {
                    content.push(UserContentBlock::Image {
                        source: crate::events::ImageSourcePayload {
                            r#type: "base64".to_string(),
                            data: Some(image.data.clone()),
                            media_type: Some(image.mime_type.clone()),
                            url: None,
                        },
                    });
                } else if let Some(uri) = image.uri.as_ref().filter(|u| u.starts_with("http")) {
                    content.push(UserContentBlock::Image {
                        source: crate::events::ImageSourcePayload {
                            r#type: "url".to_string(),
                            data: None,
                            media_type: None,
                            url: Some(uri.clone()),
                        },
                    });
                }
            }
            ContentBlock::Audio(audio) => {
                let mime = if audio.mime_type.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", audio.mime_type)
                };
                content.push(UserContentBlock::Text {
                    text: format!("[audio attachment{}]", mime),
                });
            }
            _ => {}
        }
    }

    content.extend(context);
    SdkUserMessage::new(session_id, content)
}

// Available-command mapping.

/// Map backend slash commands to the client vocabulary. MCP-suffixed names
/// are rewritten to the `mcp:` prefixed form; argument hints ride in meta.
pub fn available_commands_from(commands: &[SlashCommandInfo]) -> Vec<AvailableCommand> {
    commands
        .iter()
        .map(|command| {
            let name = match command.name.strip_suffix(" (MCP)") {
                Some(stripped) => format!("mcp:{}", stripped),
                None => command.name.clone(),
            };
            let meta = command
                .argument_hint
                .as_ref()
                .map(|hint| json!({ "hint": hint.as_hint() }));
            AvailableCommand {
                name,
                description: command.description.clone(),
                input: None,
                meta,
            }
        })
        .collect()
}

/// Compare command sets by name, description, and hint to suppress
/// redundant notifications.
pub fn available_commands_equal(a: &[AvailableCommand], b: &[AvailableCommand]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(left, right)| {
        let hint = |command: &AvailableCommand| {
            command
                .meta
                .as_ref()
                .and_then(|m| m.get("hint"))
                .and_then(|h| h.as_str())
                .map(|h| h.to_string())
        };
        left.name == right.name
            && left.description == right.description
            && hint(left) == hint(right)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cx() -> ContentCx<'static> {
        ContentCx {
            role: Role::Assistant,
            parent_tool_use_id: None,
            register_hooks: true,
        }
    }

    #[test]
    fn test_text_chunk_maps_to_message_chunk() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        let updates = translate_blocks(
            &[json!({"type": "text", "text": "Hello"})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        assert_eq!(updates.len(), 1);
        match &updates[0].update {
            SessionUpdate::AgentMessageChunk(chunk) => match &chunk.content {
                ContentBlock::Text(text) => assert_eq!(text.text, "Hello"),
                other => panic!("Expected text block, got {:?}", other),
            },
            other => panic!("Expected message chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_thinking_maps_to_thought_chunk() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        let updates = translate_blocks(
            &[json!({"type": "thinking", "thinking": "hmm"})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        assert!(matches!(
            updates[0].update,
            SessionUpdate::AgentThoughtChunk(_)
        ));
    }

    #[test]
    fn test_tool_use_creates_call_and_caches_record() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        let updates = translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "ls"}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        assert!(cache.contains_key("toolu_1"));
        assert!(hooks.contains_key("toolu_1"));
        match &updates[0].update {
            SessionUpdate::ToolCall(call) => {
                assert_eq!(call.id.0.as_ref(), "toolu_1");
                assert_eq!(call.title, "`ls`");
                assert_eq!(call.status, ToolCallStatus::Pending);
                assert_eq!(call.kind, agent_client_protocol::ToolKind::Execute);
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_tool_produces_plan_not_tool_call() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        let updates = translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_2", "name": "TodoWrite", "input": {
                "todos": [
                    {"content": "write tests", "status": "in_progress", "activeForm": "writing"},
                    {"content": "ship", "status": "pending", "activeForm": "shipping"}
                ]
            }})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        assert_eq!(updates.len(), 1);
        match &updates[0].update {
            SessionUpdate::Plan(plan) => assert_eq!(plan.entries.len(), 2),
            other => panic!("Expected plan update, got {:?}", other),
        }
        // Cached for result correlation, but no hook continuation.
        assert!(cache.contains_key("toolu_2"));
        assert!(!hooks.contains_key("toolu_2"));
    }

    #[test]
    fn test_tool_result_without_invocation_is_dropped() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        let updates = translate_blocks(
            &[json!({"type": "tool_result", "tool_use_id": "ghost", "content": "x"})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        assert!(updates.is_empty());
    }

    #[test]
    fn test_tool_result_completes_tracked_call() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_3", "name": "Glob", "input": {"pattern": "*.rs"}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        let updates = translate_blocks(
            &[json!({"type": "tool_result", "tool_use_id": "toolu_3", "content": "src/lib.rs"})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        match &updates[0].update {
            SessionUpdate::ToolCallUpdate(update) => {
                assert_eq!(update.fields.status, Some(ToolCallStatus::Completed));
                assert!(update.fields.raw_output.is_some());
            }
            other => panic!("Expected tool call update, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_tool_result() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_4", "name": "Bash", "input": {}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        let updates = translate_blocks(
            &[json!({"type": "tool_result", "tool_use_id": "toolu_4", "content": "boom", "is_error": true})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        match &updates[0].update {
            SessionUpdate::ToolCallUpdate(update) => {
                assert_eq!(update.fields.status, Some(ToolCallStatus::Failed));
            }
            other => panic!("Expected tool call update, got {:?}", other),
        }
    }

    #[test]
    fn test_background_task_result_stays_in_progress() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_5", "name": "Task",
                     "input": {"run_in_background": true, "prompt": "build"}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        let updates = translate_blocks(
            &[json!({"type": "tool_result", "tool_use_id": "toolu_5",
                     "content": {"task_id": "task_9", "output_file": "/tmp/out.log"}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        match &updates[0].update {
            SessionUpdate::ToolCallUpdate(update) => {
                assert_eq!(update.fields.status, Some(ToolCallStatus::InProgress));
            }
            other => panic!("Expected tool call update, got {:?}", other),
        }
        let binding = updates[0].background.as_ref().unwrap();
        assert_eq!(binding.task_id.as_deref(), Some("task_9"));
        assert_eq!(binding.output_file.as_deref(), Some("/tmp/out.log"));
    }

    #[test]
    fn test_subagent_label_prefixes_title() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_parent", "name": "Task",
                     "input": {"subagent_type": "Explore", "prompt": "scan"}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        let nested_cx = ContentCx {
            role: Role::Assistant,
            parent_tool_use_id: Some("toolu_parent"),
            register_hooks: true,
        };
        let updates = translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_child", "name": "Read",
                     "input": {"file_path": "a.rs"}})],
            nested_cx,
            &mut cache,
            &mut hooks,
        );
        match &updates[0].update {
            SessionUpdate::ToolCall(call) => {
                assert_eq!(call.title, "[Explore#toolu_parent] Read a.rs");
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_untracked_parent_gets_generic_label() {
        let cache = ToolUseCache::new();
        let context = resolve_subagent_context(Some("toolu_mystery"), &cache).unwrap();
        assert_eq!(context.label, "subagent#toolu_mystery");
        assert!(context.subagent_type.is_none());
    }

    #[test]
    fn test_non_launcher_parent_yields_no_context() {
        let mut cache = ToolUseCache::new();
        cache.insert(
            "toolu_bash".to_string(),
            ToolUseRecord {
                id: "toolu_bash".to_string(),
                name: "Bash".to_string(),
                input: json!({}),
            },
        );
        assert!(resolve_subagent_context(Some("toolu_bash"), &cache).is_none());
    }

    #[test]
    fn test_stream_delta_uses_same_mapping() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        let stream: StreamEvent = serde_json::from_value(json!({
            "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hi"}},
            "parent_tool_use_id": null
        }))
        .unwrap();
        let updates = translate_stream_event(&stream, &mut cache, &mut hooks);
        assert!(matches!(
            updates[0].update,
            SessionUpdate::AgentMessageChunk(_)
        ));

        let stop: StreamEvent = serde_json::from_value(json!({
            "event": {"type": "message_stop"},
            "parent_tool_use_id": null
        }))
        .unwrap();
        assert!(translate_stream_event(&stop, &mut cache, &mut hooks).is_empty());
    }

    #[test]
    fn test_background_metadata_structured_first() {
        let meta = extract_background_metadata(&json!({
            "task_id": "task_1",
            "output_file": "/tmp/a.log"
        }));
        assert_eq!(meta.task_id.as_deref(), Some("task_1"));
        assert_eq!(meta.output_file.as_deref(), Some("/tmp/a.log"));
    }

    #[test]
    fn test_background_metadata_tag_markers() {
        let meta = extract_background_metadata(&json!([
            {"type": "text", "text": "started <task-id>task_7</task-id> writing to <output-file>/tmp/x.log</output-file>"}
        ]));
        assert_eq!(meta.task_id.as_deref(), Some("task_7"));
        assert_eq!(meta.output_file.as_deref(), Some("/tmp/x.log"));
    }

    #[test]
    fn test_background_metadata_free_text_fallbacks() {
        let meta = extract_background_metadata(&json!("Launched. task_id: task_42\noutput_file: /tmp/task.log"));
        assert_eq!(meta.task_id.as_deref(), Some("task_42"));
        assert_eq!(meta.output_file.as_deref(), Some("/tmp/task.log"));

        let meta = extract_background_metadata(&json!(
            "Background task id = bg-7\nOutput is being written to: /var/log/bg.txt"
        ));
        assert_eq!(meta.task_id.as_deref(), Some("bg-7"));
        assert_eq!(meta.output_file.as_deref(), Some("/var/log/bg.txt"));
    }

    #[test]
    fn test_structured_fields_beat_free_text() {
        let meta = extract_background_metadata(&json!({
            "task_id": "real_task",
            "output_file": "/tmp/real.log",
            "text": "task_id: decoy"
        }));
        assert_eq!(meta.task_id.as_deref(), Some("real_task"));
    }

    #[test]
    fn test_usage_aggregation() {
        let usage = map_usage(&json!({
            "input_tokens": 10,
            "output_tokens": 5,
            "cache_read_input_tokens": 20,
            "cache_creation_input_tokens": 1,
            "thinking_tokens": 0
        }))
        .unwrap();
        assert_eq!(usage.total_tokens, 36);
        assert_eq!(usage.thought_tokens, Some(0));
    }

    #[test]
    fn test_usage_absent_counters() {
        assert!(map_usage(&json!({})).is_none());
        let usage = map_usage(&json!({"output_tokens": 7})).unwrap();
        assert_eq!(usage.total_tokens, 7);
        assert!(usage.cached_read_tokens.is_none());
    }

    #[test]
    fn test_context_window_is_max_of_declared_and_total() {
        let result: ResultEvent = serde_json::from_value(json!({
            "subtype": "success",
            "is_error": false,
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 20,
                      "cache_creation_input_tokens": 1, "thinking_tokens": 0},
            "modelUsage": {"claude-sonnet-4-5": {"contextWindow": 200000}}
        }))
        .unwrap();
        let (usage, update) = usage_update(&result).unwrap();
        assert_eq!(usage.total_tokens, 36);
        assert_eq!(update.used, 36);
        assert_eq!(update.size, 200000);
    }

    #[test]
    fn test_context_window_floor_is_total() {
        let result: ResultEvent = serde_json::from_value(json!({
            "subtype": "success",
            "is_error": false,
            "usage": {"input_tokens": 100},
            "modelUsage": {"m": {"contextWindow": 10}}
        }))
        .unwrap();
        let (_, update) = usage_update(&result).unwrap();
        assert_eq!(update.size, 100);
    }

    #[test]
    fn test_markdown_escape_grows_fence() {
        let escaped = markdown_escape("plain");
        assert_eq!(escaped, "```\nplain\n```");

        let tricky = "```rust\ncode\n```";
        let escaped = markdown_escape(tricky);
        assert!(escaped.starts_with("````\n"));
        assert!(escaped.ends_with("````"));
    }

    #[test]
    fn test_read_result_strips_system_reminder() {
        let mut cache = ToolUseCache::new();
        let mut hooks = PendingHooks::new();
        translate_blocks(
            &[json!({"type": "tool_use", "id": "toolu_r", "name": "mcp__acp__Read",
                     "input": {"file_path": "a.txt"}})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        let body = format!("file body{}", SYSTEM_REMINDER);
        let updates = translate_blocks(
            &[json!({"type": "tool_result", "tool_use_id": "toolu_r",
                     "content": [{"type": "text", "text": body}]})],
            cx(),
            &mut cache,
            &mut hooks,
        );
        match &updates[0].update {
            SessionUpdate::ToolCallUpdate(update) => {
                let content = update.fields.content.as_ref().unwrap();
                match &content[0] {
                    ToolCallContent::Content {
                        content: ContentBlock::Text(text),
                    } => {
                        assert!(!text.text.contains("system-reminder"));
                        assert!(text.text.contains("file body"));
                    }
                    other => panic!("Expected text content, got {:?}", other),
                }
            }
            other => panic!("Expected tool call update, got {:?}", other),
        }
    }

    #[test]
    fn test_prompt_composition_text_and_resource() {
        use agent_client_protocol::{
            EmbeddedResource, EmbeddedResourceResource, TextResourceContents,
        };
        let prompt = vec![
            ContentBlock::Text(TextContent {
                text: "look at this".to_string(),
                annotations: None,
                meta: None,
            }),
            ContentBlock::Resource(EmbeddedResource {
                resource: EmbeddedResourceResource::TextResourceContents(TextResourceContents {
                    uri: "file:///tmp/notes.md".to_string(),
                    text: "important".to_string(),
                    mime_type: None,
                    meta: None,
                }),
                annotations: None,
                meta: None,
            }),
        ];
        let message = prompt_to_backend("sess_1", &prompt);
        let value = serde_json::to_value(&message).unwrap();
        let content = value["message"]["content"].as_array().unwrap();
        assert_eq!(content[0]["text"], "look at this");
        assert_eq!(content[1]["text"], "[@notes.md](file:///tmp/notes.md)");
        // Context trailer lands after the visible content.
        let trailer = content[2]["text"].as_str().unwrap();
        assert!(trailer.contains("<context ref=\"file:///tmp/notes.md\">"));
        assert!(trailer.contains("important"));
    }

    #[test]
    fn test_prompt_mcp_command_rewrite() {
        let prompt = vec![ContentBlock::Text(TextContent {
            text: "/mcp:sah:review src/lib.rs".to_string(),
            annotations: None,
            meta: None,
        })];
        let message = prompt_to_backend("sess_1", &prompt);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value["message"]["content"][0]["text"],
            "/sah:review (MCP) src/lib.rs"
        );
    }

    #[test]
    fn test_available_commands_mapping_and_equality() {
        let commands = vec![
            SlashCommandInfo {
                name: "compact".to_string(),
                description: "Compact history".to_string(),
                argument_hint: None,
            },
            SlashCommandInfo {
                name: "sah:review (MCP)".to_string(),
                description: "Review".to_string(),
                argument_hint: Some(crate::events::ArgumentHint::One("file".to_string())),
            },
        ];
        let mapped = available_commands_from(&commands);
        assert_eq!(mapped[1].name, "mcp:sah:review");
        assert_eq!(
            mapped[1].meta.as_ref().unwrap()["hint"].as_str(),
            Some("file")
        );
        assert!(available_commands_equal(&mapped, &mapped.clone()));

        let remapped = available_commands_from(&commands[..1]);
        assert!(!available_commands_equal(&mapped, &remapped));
    }
}
