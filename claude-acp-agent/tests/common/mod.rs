//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use claude_acp_agent::playback::{BackendScript, RecordingClient, ScriptItem, ScriptedLauncher};
use claude_acp_agent::{AgentConfig, ClaudeAcpAgent, NewSessionParams};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::rc::Rc;

/// Agent wired to scripted collaborators.
pub struct Harness {
    pub client: Rc<RecordingClient>,
    pub launcher: Rc<ScriptedLauncher>,
    pub agent: ClaudeAcpAgent,
}

pub fn harness(scripts: Vec<BackendScript>) -> Harness {
    harness_with_config(scripts, AgentConfig::default())
}

pub fn harness_with_config(scripts: Vec<BackendScript>, config: AgentConfig) -> Harness {
    let client = Rc::new(RecordingClient::new());
    let launcher = Rc::new(ScriptedLauncher::new(scripts));
    let agent = ClaudeAcpAgent::new(client.clone(), launcher.clone(), config);
    Harness {
        client,
        launcher,
        agent,
    }
}

pub fn params() -> NewSessionParams {
    NewSessionParams {
        cwd: PathBuf::from("/tmp/project"),
        ..Default::default()
    }
}

pub async fn open_session(harness: &Harness) -> String {
    harness
        .agent
        .new_session(params())
        .await
        .expect("session creation failed")
        .session_id
}

pub fn text_prompt(text: &str) -> Vec<agent_client_protocol::ContentBlock> {
    vec![agent_client_protocol::ContentBlock::Text(
        agent_client_protocol::TextContent {
            text: text.to_string(),
            annotations: None,
            meta: None,
        },
    )]
}

// Scripted event builders.

pub fn ev(value: Value) -> ScriptItem {
    ScriptItem::Event(value)
}

pub fn ev_assistant_text(text: &str) -> ScriptItem {
    ev(json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": [{"type": "text", "text": text}]},
        "parent_tool_use_id": null
    }))
}

pub fn ev_stream_text_delta(text: &str) -> ScriptItem {
    ev(json!({
        "type": "stream_event",
        "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": text}},
        "parent_tool_use_id": null
    }))
}

pub fn ev_tool_use(id: &str, name: &str, input: Value) -> ScriptItem {
    ev(json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": [
            {"type": "tool_use", "id": id, "name": name, "input": input}
        ]},
        "parent_tool_use_id": null
    }))
}

pub fn ev_tool_result(id: &str, content: Value) -> ScriptItem {
    ev(json!({
        "type": "user",
        "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": id, "content": content}
        ]},
        "parent_tool_use_id": null,
        "uuid": null
    }))
}

pub fn ev_result_success() -> ScriptItem {
    ev(json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": "done",
        "errors": [],
        "usage": {"input_tokens": 10, "output_tokens": 5},
        "stop_reason": "end_turn",
        "num_turns": 1
    }))
}

pub fn ev_task_notification(task_id: &str, status: &str, summary: &str, output_file: &str) -> ScriptItem {
    ev(json!({
        "type": "system",
        "subtype": "task_notification",
        "task_id": task_id,
        "status": status,
        "summary": summary,
        "output_file": output_file
    }))
}

/// A one-turn script ending in a successful result.
pub fn turn(mut items: Vec<ScriptItem>) -> Vec<ScriptItem> {
    items.push(ev_result_success());
    items
}
