//! The per-turn event loop
//!
//! One prompt drives one pass of this loop: compose and submit the user
//! message, then drain turn items strictly in order until the terminal
//! result event. Translation of an event is fully emitted before the next
//! event is taken, so clients observe updates in arrival order. Permission
//! probes are answered inline; the loop suspends only on the next event,
//! a permission response, or a background file read.

use crate::agent::ClaudeAcpAgent;
use crate::backend::TurnItem;
use crate::client::EXT_USAGE_UPDATE;
use crate::error::{AgentError, Result};
use crate::events::{
    AssistantEvent, AuthStatusEvent, MessageContent, ResultEvent, ResultSubtype, SdkEvent,
    SystemEvent, ToolProgressEvent, ToolUseSummaryEvent, UserEvent,
};
use crate::permissions::PermissionResult;
use crate::session::Session;
use crate::translator::{
    prefix_title, prompt_to_backend, resolve_subagent_context, thought_chunk, translate_content,
    translate_stream_event, usage_update, ContentCx, Role, TokenUsage,
};
use agent_client_protocol::{
    ContentBlock, PromptResponse, SessionNotification, SessionUpdate, StopReason, TextContent,
    ToolCallId, ToolCallStatus, ToolCallUpdate, ToolCallUpdateFields,
};
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

const SYNTHETIC_MODEL: &str = "<synthetic>";
const LOGIN_DIRECTIVE: &str = "Please run /login";

impl ClaudeAcpAgent {
    /// Run one prompt turn to its terminal response.
    pub async fn prompt(
        &self,
        session_id: &str,
        prompt: Vec<ContentBlock>,
    ) -> Result<PromptResponse> {
        let session = self.session(session_id)?;
        {
            session.borrow_mut().cancelled = false;
        }
        self.refresh_available_commands(session_id, None).await?;

        let control = { Rc::clone(&session.borrow().control) };
        control
            .send_user_message(prompt_to_backend(session_id, &prompt))
            .await?;

        loop {
            // Re-read the handle each iteration: a plan-mode exit can swap
            // the backend conversation mid-turn.
            let events = { Rc::clone(&session.borrow().events) };
            let item = {
                let mut receiver = events.lock().await;
                receiver.recv().await
            };

            match item {
                None => {
                    if session.borrow().cancelled {
                        return Ok(PromptResponse::new(StopReason::Cancelled));
                    }
                    return Err(AgentError::Protocol(
                        "backend stream ended without a result".to_string(),
                    ));
                }
                Some(TurnItem::Permission(probe)) => {
                    match self
                        .authorize_tool_use(
                            session_id,
                            &probe.tool_name,
                            &probe.tool_use_id,
                            probe.input,
                        )
                        .await
                    {
                        Ok(result) => {
                            if probe.respond.send(result).is_err() {
                                tracing::warn!(
                                    "Backend dropped permission probe for {}",
                                    probe.tool_use_id
                                );
                            }
                        }
                        Err(err) => {
                            // Answer the backend so it can fail the call,
                            // then fail the turn.
                            let _ = probe.respond.send(PermissionResult::deny(err.to_string()));
                            return Err(err);
                        }
                    }
                }
                Some(TurnItem::Event(event)) => {
                    if let Some(response) =
                        self.handle_turn_event(&session, session_id, event).await?
                    {
                        return Ok(response);
                    }
                }
            }
        }
    }

    /// Total dispatch over the backend event union. Returns the terminal
    /// response when the turn is over.
    async fn handle_turn_event(
        &self,
        session: &Rc<RefCell<Session>>,
        session_id: &str,
        event: SdkEvent,
    ) -> Result<Option<PromptResponse>> {
        match event {
            SdkEvent::System(system) => {
                self.handle_system_event(session, session_id, system).await?;
                Ok(None)
            }

            SdkEvent::StreamEvent(stream) => {
                let updates = {
                    let mut guard = session.borrow_mut();
                    let state = &mut *guard;
                    translate_stream_event(
                        &stream,
                        &mut state.tool_use_cache,
                        &mut state.pending_hooks,
                    )
                };
                self.emit_translated(session, updates).await?;
                Ok(None)
            }

            SdkEvent::Assistant(assistant) => {
                self.handle_assistant_event(session, session_id, assistant)
                    .await?;
                Ok(None)
            }

            SdkEvent::User(user) => {
                self.handle_user_event(session, user).await?;
                Ok(None)
            }

            SdkEvent::ToolProgress(progress) => {
                self.handle_tool_progress(session, progress).await?;
                Ok(None)
            }

            SdkEvent::ToolUseSummary(summary) => {
                self.handle_tool_use_summary(session, summary).await?;
                Ok(None)
            }

            SdkEvent::AuthStatus(auth) => {
                self.handle_auth_status(session, auth).await?;
                Ok(None)
            }

            SdkEvent::Result(result) => {
                self.handle_result_event(session, session_id, result).await
            }
        }
    }

    async fn handle_system_event(
        &self,
        session: &Rc<RefCell<Session>>,
        session_id: &str,
        event: SystemEvent,
    ) -> Result<()> {
        match event {
            SystemEvent::Init(init) => {
                if let Some(mode) = init.permission_mode {
                    self.note_mode_state(session, mode);
                    self.emit_mode_update(session_id, mode).await?;
                }

                let mut config_updated = false;
                {
                    let mut guard = session.borrow_mut();
                    if let Some(model) = init.model.as_deref().filter(|m| !m.is_empty()) {
                        if guard.config.model_id != model {
                            guard.config.model_id = model.to_string();
                            config_updated = true;
                        }
                    }
                    if let Some(style) = init.output_style.as_deref().filter(|s| !s.is_empty()) {
                        if guard.config.output_style_id != style {
                            guard.config.output_style_id = style.to_string();
                            config_updated = true;
                        }
                    }
                    if !init.available_output_styles.is_empty() {
                        let mut styles = init.available_output_styles.clone();
                        let current = guard.config.output_style_id.clone();
                        if !styles.contains(&current) {
                            styles.push(current);
                        }
                        guard.config.output_style_options = styles
                            .into_iter()
                            .map(|style| crate::config::SelectOption::new(&style, &style))
                            .collect();
                    }
                }
                if config_updated {
                    self.emit_config_update(session_id).await?;
                }

                let account_info = { session.borrow().config.account_info.clone() };
                self.emit_session_info(
                    session_id,
                    json!({
                        "apiKeySource": init.api_key_source,
                        "agentVersion": init.agent_version,
                        "cwd": init.cwd,
                        "mcpServers": init.mcp_servers,
                        "model": init.model,
                        "outputStyle": init.output_style,
                        "slashCommands": init.slash_commands.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                        "tools": init.tools,
                        "accountInfo": account_info,
                    }),
                )
                .await?;

                self.refresh_available_commands(session_id, Some(init.slash_commands))
                    .await
            }

            SystemEvent::CompactBoundary { compact_metadata } => {
                self.emit_update(
                    session,
                    thought_chunk(format!(
                        "Context compacted ({}, {} tokens)",
                        compact_metadata.trigger, compact_metadata.pre_tokens
                    )),
                    None,
                )
                .await
            }

            SystemEvent::HookStarted(hook) => {
                let meta = hook_meta(&hook);
                self.emit_update(
                    session,
                    thought_chunk(format!(
                        "Hook started: {} ({})",
                        hook.hook_name,
                        hook.hook_event.as_deref().unwrap_or("unknown")
                    )),
                    Some(meta),
                )
                .await
            }

            SystemEvent::HookProgress(hook) => {
                let meta = hook_meta(&hook);
                let text = hook
                    .display_output()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("Hook progress: {}", hook.hook_name));
                self.emit_update(session, thought_chunk(text), Some(meta)).await
            }

            SystemEvent::HookResponse(hook) => {
                let meta = hook_meta(&hook);
                let text = hook.display_output().map(|s| s.to_string()).unwrap_or_else(|| {
                    format!(
                        "Hook {} {}",
                        hook.hook_name,
                        hook.outcome.as_deref().unwrap_or("finished")
                    )
                });
                self.emit_update(session, thought_chunk(text), Some(meta)).await
            }

            SystemEvent::TaskNotification(task) => {
                if self
                    .background
                    .borrow()
                    .is_finalized(session_id, &task.task_id)
                {
                    return Ok(());
                }
                let text = self.format_task_notification(&task).await;
                let meta = json!({
                    "claudeCode": {
                        "outputFile": task.output_file.clone(),
                        "status": task.status.as_str(),
                        "taskId": task.task_id.clone(),
                    }
                });
                self.emit_update(session, thought_chunk(text.clone()), Some(meta))
                    .await?;
                self.emit_update(
                    session,
                    SessionUpdate::AgentMessageChunk(agent_client_protocol::ContentChunk {
                        content: text_content(text),
                        meta: None,
                    }),
                    None,
                )
                .await?;
                self.complete_background_task(session_id, &task).await
            }

            SystemEvent::Status(status) => {
                if let Some(mode) = status.permission_mode {
                    let changed = self.note_mode_state(session, mode);
                    self.emit_mode_update(session_id, mode).await?;
                    if changed {
                        self.emit_config_update(session_id).await?;
                    }
                }
                if status.status.as_deref() == Some("compacting") {
                    self.emit_update(session, thought_chunk("Compacting context..."), None)
                        .await?;
                }
                Ok(())
            }

            SystemEvent::FilesPersisted(event) => {
                let failed = if event.failed.is_empty() {
                    String::new()
                } else {
                    format!(" ({} failed)", event.failed.len())
                };
                self.emit_update(
                    session,
                    thought_chunk(format!("Persisted {} files{}", event.files.len(), failed)),
                    None,
                )
                .await
            }
        }
    }

    async fn handle_assistant_event(
        &self,
        session: &Rc<RefCell<Session>>,
        session_id: &str,
        assistant: AssistantEvent,
    ) -> Result<()> {
        if session.borrow().cancelled {
            return Ok(());
        }

        let model = assistant.message.model.as_deref().unwrap_or_default();
        if !model.is_empty() && model != SYNTHETIC_MODEL {
            let changed = {
                let mut guard = session.borrow_mut();
                let changed = guard.config.model_id != model;
                guard.config.model_id = model.to_string();
                changed
            };
            if changed {
                self.emit_config_update(session_id).await?;
            }
        }

        if let Some(text) = assistant.message.content.as_text() {
            // Slash commands sometimes route their stdout through the
            // message body; surface context reports and drop the rest.
            if text.contains("<local-command-stdout>") {
                if text.contains("Context Usage") {
                    let cleaned = text
                        .replace("<local-command-stdout>", "")
                        .replace("</local-command-stdout>", "");
                    self.emit_update(
                        session,
                        SessionUpdate::AgentMessageChunk(agent_client_protocol::ContentChunk {
                            content: text_content(cleaned),
                            meta: None,
                        }),
                        None,
                    )
                    .await?;
                }
                tracing::debug!("Dropped local command stdout message");
                return Ok(());
            }
            if text.contains("<local-command-stderr>") {
                tracing::error!("Local command stderr: {}", text);
                return Ok(());
            }
        }

        if model == SYNTHETIC_MODEL {
            if let MessageContent::Blocks(blocks) = &assistant.message.content {
                let login_notice = blocks.len() == 1
                    && blocks[0].get("type").and_then(|t| t.as_str()) == Some("text")
                    && blocks[0]
                        .get("text")
                        .and_then(|t| t.as_str())
                        .map(|t| t.contains(LOGIN_DIRECTIVE))
                        .unwrap_or(false);
                if login_notice {
                    return Err(AgentError::AuthRequired(LOGIN_DIRECTIVE.to_string()));
                }
            }
        }

        // With partial streaming on, text and thinking already arrived as
        // deltas; only the remaining block types are translated here.
        let streaming = { session.borrow().config.enable_partial_messages };
        let content = match (&assistant.message.content, streaming) {
            (MessageContent::Blocks(blocks), true) => MessageContent::Blocks(
                blocks
                    .iter()
                    .filter(|block| {
                        !matches!(
                            block.get("type").and_then(|t| t.as_str()),
                            Some("text") | Some("thinking")
                        )
                    })
                    .cloned()
                    .collect(),
            ),
            (content, _) => content.clone(),
        };

        let updates = {
            let mut guard = session.borrow_mut();
            let state = &mut *guard;
            translate_content(
                &content,
                ContentCx {
                    role: Role::Assistant,
                    parent_tool_use_id: assistant.parent_tool_use_id.as_deref(),
                    register_hooks: true,
                },
                &mut state.tool_use_cache,
                &mut state.pending_hooks,
            )
        };
        self.emit_translated(session, updates).await
    }

    async fn handle_user_event(
        &self,
        session: &Rc<RefCell<Session>>,
        user: UserEvent,
    ) -> Result<()> {
        if session.borrow().cancelled {
            return Ok(());
        }

        if let Some(uuid) = user.uuid.as_deref().filter(|u| !u.is_empty()) {
            session
                .borrow_mut()
                .push_checkpoint(uuid, self.config.max_checkpoints);
        }

        if let Some(text) = user.message.content.as_text() {
            if text.contains("<local-command-stdout>") || text.contains("<local-command-stderr>") {
                tracing::debug!("Dropped local command output in user message");
                return Ok(());
            }
        }

        // Plain user text is the prompt echo; clients already have it.
        let is_plain_text = match &user.message.content {
            MessageContent::Text(_) => true,
            MessageContent::Blocks(blocks) => {
                blocks.len() == 1
                    && blocks[0].get("type").and_then(|t| t.as_str()) == Some("text")
            }
        };
        if is_plain_text {
            return Ok(());
        }

        let updates = {
            let mut guard = session.borrow_mut();
            let state = &mut *guard;
            translate_content(
                &user.message.content,
                ContentCx {
                    role: Role::User,
                    parent_tool_use_id: user.parent_tool_use_id.as_deref(),
                    register_hooks: true,
                },
                &mut state.tool_use_cache,
                &mut state.pending_hooks,
            )
        };
        self.emit_translated(session, updates).await
    }

    async fn handle_tool_progress(
        &self,
        session: &Rc<RefCell<Session>>,
        progress: ToolProgressEvent,
    ) -> Result<()> {
        let (context, acp_id) = {
            let guard = session.borrow();
            (
                resolve_subagent_context(
                    progress.parent_tool_use_id.as_deref(),
                    &guard.tool_use_cache,
                ),
                guard.acp_id(),
            )
        };
        let base_title = format!(
            "{} ({}s)",
            progress.tool_name,
            progress.elapsed_time_seconds.round() as i64
        );
        let title = prefix_title(&base_title, context.as_ref());

        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update: SessionUpdate::ToolCallUpdate(ToolCallUpdate {
                    id: ToolCallId(Arc::from(progress.tool_use_id.as_str())),
                    fields: ToolCallUpdateFields {
                        status: Some(ToolCallStatus::InProgress),
                        kind: None,
                        title: Some(title),
                        content: None,
                        locations: None,
                        raw_input: None,
                        raw_output: None,
                    },
                    meta: None,
                }),
                meta: Some(json!({
                    "claudeCode": {
                        "elapsedTimeSeconds": progress.elapsed_time_seconds,
                        "parentToolUseId": progress.parent_tool_use_id,
                        "subagentLabel": context.as_ref().map(|c| c.label.clone()),
                        "subagentType": context.as_ref().and_then(|c| c.subagent_type.clone()),
                        "toolName": progress.tool_name,
                    }
                })),
            })
            .await
    }

    async fn handle_tool_use_summary(
        &self,
        session: &Rc<RefCell<Session>>,
        summary: ToolUseSummaryEvent,
    ) -> Result<()> {
        let meta = json!({
            "claudeCode": {
                "precedingToolUseIds": summary.preceding_tool_use_ids,
            }
        });
        self.emit_update(session, thought_chunk(summary.summary), Some(meta))
            .await
    }

    async fn handle_auth_status(
        &self,
        session: &Rc<RefCell<Session>>,
        auth: AuthStatusEvent,
    ) -> Result<()> {
        let mut lines: Vec<String> = auth
            .output
            .iter()
            .filter(|line| !line.is_empty())
            .cloned()
            .collect();
        if let Some(error) = auth.error.as_deref().filter(|e| !e.is_empty()) {
            lines.push(format!("Error: {}", error));
        }
        if auth.is_authenticating && auth.output.is_empty() {
            lines.push("Authenticating...".to_string());
        }
        if lines.is_empty() {
            return Ok(());
        }

        let meta = json!({
            "claudeCode": {
                "error": auth.error,
                "isAuthenticating": auth.is_authenticating,
            }
        });
        self.emit_update(session, thought_chunk(lines.join("\n")), Some(meta))
            .await
    }

    async fn handle_result_event(
        &self,
        session: &Rc<RefCell<Session>>,
        session_id: &str,
        result: ResultEvent,
    ) -> Result<Option<PromptResponse>> {
        if session.borrow().cancelled {
            return Ok(Some(PromptResponse::new(StopReason::Cancelled)));
        }

        let usage = match usage_update(&result) {
            Some((usage, update)) => {
                self.client
                    .ext_notification(
                        EXT_USAGE_UPDATE,
                        json!({
                            "sessionId": session_id,
                            "used": update.used,
                            "size": update.size,
                            "cost": update.cost,
                            "claudeCode": {
                                "usage": result.usage.clone(),
                                "modelUsage": result.model_usage.clone(),
                                "permissionDenials": result.permission_denials.clone(),
                                "resultSubtype": result.subtype.as_str(),
                            }
                        }),
                    )
                    .await?;
                Some(usage)
            }
            None => None,
        };

        let failure_message = |result: &ResultEvent| {
            if result.errors.is_empty() {
                result.subtype.as_str().to_string()
            } else {
                result.errors.join(", ")
            }
        };

        match result.subtype {
            ResultSubtype::Success => {
                if let Some(text) = result.result.as_deref() {
                    if text.contains(LOGIN_DIRECTIVE) {
                        return Err(AgentError::AuthRequired(LOGIN_DIRECTIVE.to_string()));
                    }
                }
                if result.is_error {
                    return Err(AgentError::Process(
                        result.result.clone().unwrap_or_else(|| "unknown".to_string()),
                    ));
                }
                self.refresh_available_commands(session_id, None).await?;
                Ok(Some(build_prompt_response(StopReason::EndTurn, &result, usage)))
            }
            ResultSubtype::ErrorDuringExecution => {
                if result.is_error {
                    return Err(AgentError::Process(failure_message(&result)));
                }
                self.refresh_available_commands(session_id, None).await?;
                Ok(Some(build_prompt_response(StopReason::EndTurn, &result, usage)))
            }
            ResultSubtype::ErrorMaxTurns
            | ResultSubtype::ErrorMaxBudgetUsd
            | ResultSubtype::ErrorMaxStructuredOutputRetries => {
                if result.is_error {
                    return Err(AgentError::Process(failure_message(&result)));
                }
                self.refresh_available_commands(session_id, None).await?;
                Ok(Some(build_prompt_response(
                    StopReason::MaxTurnRequests,
                    &result,
                    usage,
                )))
            }
        }
    }

    pub(crate) async fn emit_update(
        &self,
        session: &Rc<RefCell<Session>>,
        update: SessionUpdate,
        meta: Option<Value>,
    ) -> Result<()> {
        let acp_id = { session.borrow().acp_id() };
        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update,
                meta,
            })
            .await
    }
}

fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text(TextContent {
        text: text.into(),
        annotations: None,
        meta: None,
    })
}

fn hook_meta(hook: &crate::events::HookEvent) -> Value {
    json!({
        "claudeCode": {
            "hookEvent": hook.hook_event.clone(),
            "hookId": hook.hook_id.clone(),
            "hookName": hook.hook_name.clone(),
            "outcome": hook.outcome.clone(),
            "exitCode": hook.exit_code,
        }
    })
}

/// Terminal response: stop reason from the result subtype, raw diagnostics
/// preserved opaquely in metadata for forwarding.
fn build_prompt_response(
    stop_reason: StopReason,
    result: &ResultEvent,
    usage: Option<TokenUsage>,
) -> PromptResponse {
    let mut claude_code = Map::new();
    claude_code.insert("subtype".to_string(), json!(result.subtype.as_str()));
    claude_code.insert("durationMs".to_string(), json!(result.duration_ms));
    claude_code.insert("durationApiMs".to_string(), json!(result.duration_api_ms));
    claude_code.insert("numTurns".to_string(), json!(result.num_turns));
    claude_code.insert("stopReason".to_string(), json!(result.stop_reason.clone()));
    claude_code.insert("totalCostUsd".to_string(), json!(result.total_cost_usd));
    claude_code.insert("modelUsage".to_string(), json!(result.model_usage.clone()));
    claude_code.insert(
        "permissionDenials".to_string(),
        json!(result.permission_denials.clone()),
    );
    if result.subtype == ResultSubtype::Success {
        if let Some(structured) = &result.structured_output {
            claude_code.insert("structuredOutput".to_string(), structured.clone());
        }
    }
    if result.subtype != ResultSubtype::Success && !result.errors.is_empty() {
        claude_code.insert("errors".to_string(), json!(result.errors.clone()));
    }

    let mut meta = Map::new();
    meta.insert("claudeCode".to_string(), Value::Object(claude_code));
    if let Some(usage) = usage {
        meta.insert("usage".to_string(), json!(usage));
    }

    PromptResponse::new(stop_reason).meta(meta)
}
