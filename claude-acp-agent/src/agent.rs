//! Session registry
//!
//! [`ClaudeAcpAgent`] owns one state record per active session and
//! orchestrates the translator, the permission flows, and the background
//! task correlator around the backend and client collaborators.
//!
//! Scheduling is single-threaded and cooperative: session state lives in
//! `RefCell`s and every borrow is dropped before a suspension point, so no
//! lock is needed anywhere in the registry.

use crate::backend::{BackendLauncher, LaunchOptions, ModelInfo, RewindReport};
use crate::background::{read_output_tail, BackgroundTasks, HookCompletion, StatusCompletion};
use crate::client::{AgentClient, EXT_CONFIG_OPTIONS_UPDATE, EXT_INFO_UPDATE};
use crate::config::{
    ids, parse_max_value_id, AgentConfig, ConfigOption, McpServerConfig, NewSessionParams,
    PermissionMode, SessionConfigState, ThoughtLevel,
};
use crate::error::{AgentError, Result};
use crate::events::{SlashCommandInfo, TaskNotification, TaskStatus};
use crate::session::{
    load_user_message_checkpoints, read_transcript_entries, session_transcript_path, Session,
};
use crate::translator::{
    available_commands_equal, available_commands_from, translate_content, ContentCx, Role,
    TranslatedUpdate,
};
use agent_client_protocol::{
    AvailableCommandsUpdate, ContentBlock, CurrentModeUpdate, SessionModeId, SessionNotification,
    SessionUpdate, TextContent, ToolCallId, ToolCallLocation, ToolCallStatus, ToolCallUpdate,
    ToolCallUpdateFields,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Result of creating (or resuming) a session.
#[derive(Debug, Clone)]
pub struct NewSessionResult {
    pub session_id: String,
    pub config_options: Vec<ConfigOption>,
    pub current_mode: PermissionMode,
    pub available_modes: Vec<PermissionMode>,
    pub models: Vec<ModelInfo>,
    pub current_model_id: String,
}

/// Payload of the externally-delivered task-completed hook.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskCompletedHook {
    pub task_id: String,
    pub task_subject: String,
    #[serde(default)]
    pub task_description: Option<String>,
    #[serde(default)]
    pub teammate_name: Option<String>,
    #[serde(default)]
    pub team_name: Option<String>,
}

/// The ACP-facing agent: session registry plus translation pipeline.
pub struct ClaudeAcpAgent {
    pub(crate) client: Rc<dyn AgentClient>,
    pub(crate) launcher: Rc<dyn BackendLauncher>,
    pub(crate) config: AgentConfig,
    pub(crate) sessions: RefCell<HashMap<String, Rc<RefCell<Session>>>>,
    pub(crate) background: RefCell<BackgroundTasks>,
    /// Directory of externally-maintained transcript logs, used only to
    /// reconstruct checkpoint lists. `None` disables transcript access.
    transcripts_dir: Option<PathBuf>,
}

impl ClaudeAcpAgent {
    pub fn new(
        client: Rc<dyn AgentClient>,
        launcher: Rc<dyn BackendLauncher>,
        config: AgentConfig,
    ) -> Self {
        let max_finalized = config.max_finalized_tasks;
        Self {
            client,
            launcher,
            config,
            sessions: RefCell::new(HashMap::new()),
            background: RefCell::new(BackgroundTasks::new(max_finalized)),
            transcripts_dir: None,
        }
    }

    /// Configure the transcript log directory for checkpoint loading and
    /// session replay.
    pub fn with_transcripts_dir(mut self, dir: PathBuf) -> Self {
        self.transcripts_dir = Some(dir);
        self
    }

    pub(crate) fn session(&self, session_id: &str) -> Result<Rc<RefCell<Session>>> {
        self.sessions
            .borrow()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// Create a brand new session.
    pub async fn new_session(&self, params: NewSessionParams) -> Result<NewSessionResult> {
        self.create_session(params, None, false).await
    }

    /// Resume a persisted session under its original id.
    pub async fn resume_session(
        &self,
        session_id: &str,
        params: NewSessionParams,
    ) -> Result<NewSessionResult> {
        self.create_session(params, Some(session_id.to_string()), false)
            .await
    }

    /// Fork a persisted session into a fresh id.
    pub async fn fork_session(
        &self,
        session_id: &str,
        params: NewSessionParams,
    ) -> Result<NewSessionResult> {
        self.create_session(params, Some(session_id.to_string()), true)
            .await
    }

    /// Resume a persisted session and replay its transcript to the client.
    pub async fn load_session(
        &self,
        session_id: &str,
        params: NewSessionParams,
    ) -> Result<NewSessionResult> {
        let cwd = params.cwd.clone();
        let result = self
            .create_session(params, Some(session_id.to_string()), false)
            .await?;
        self.replay_session_history(session_id, &cwd).await?;
        Ok(result)
    }

    async fn create_session(
        &self,
        params: NewSessionParams,
        resume: Option<String>,
        fork_session: bool,
    ) -> Result<NewSessionResult> {
        params.validate(self.config.allow_bypass)?;

        let session_id = if fork_session {
            Uuid::new_v4().to_string()
        } else {
            resume
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string())
        };

        // Same id reused: the old state is fully torn down first.
        if self.sessions.borrow().contains_key(&session_id) {
            self.close_session(&session_id).await?;
        }

        let mode = params.mode.unwrap_or_default();
        let max_thinking_tokens = params.effective_max_thinking_tokens();

        let launch = LaunchOptions {
            cwd: params.cwd.clone(),
            session_id: session_id.clone(),
            resume: resume.clone(),
            fork_session,
            mode,
            allow_bypass: self.config.allow_bypass,
            include_partial_messages: params.enable_partial_messages.unwrap_or(true),
            max_thinking_tokens,
            model: params.model.clone(),
            mcp_servers: params.mcp_servers.clone(),
            additional_directories: params.additional_directories.clone(),
            allowed_tools: params.allowed_tools.clone(),
            disallowed_tools: params.disallowed_tools.clone(),
            tool_set: params.tools.clone().unwrap_or_default(),
            env: params.env.clone(),
            enable_file_checkpointing: params.enable_file_checkpointing.unwrap_or(true),
            persist_session: params.persist_session.unwrap_or(true),
            max_turns: params.max_turns,
            max_budget_usd: params.max_budget_usd,
            sandbox: params.sandbox.unwrap_or(false),
            betas: params.betas.clone(),
            system_prompt: params.system_prompt.clone(),
            output_format: params.output_format.clone(),
            agents: params.agents.clone(),
            setting_sources: params.setting_sources.clone(),
            fallback_model: params.fallback_model.clone(),
            user: params.user.clone(),
            cli_path: params.cli_path.clone(),
        };

        let conn = self.launcher.launch(launch).await?;

        let models = conn.control.list_models().await.unwrap_or_default();
        let current_model_id =
            resolve_startup_model(&models, params.model.as_deref(), &conn.control).await?;

        let mut output_style_options = vec![crate::config::SelectOption::new("default", "default")];
        if let Some(style) = params.output_style.as_deref() {
            if style != "default" {
                output_style_options.push(crate::config::SelectOption::new(style, style));
            }
        }

        let config_state = SessionConfigState {
            mode,
            available_modes: PermissionMode::available(self.config.allow_bypass),
            model_id: current_model_id.clone(),
            model_options: models
                .iter()
                .map(|model| {
                    let mut option =
                        crate::config::SelectOption::new(&model.model_id, &model.name);
                    option.description = model.description.clone();
                    option
                })
                .collect(),
            thought_level: params
                .thought_level
                .unwrap_or_else(|| ThoughtLevel::infer(max_thinking_tokens)),
            max_thinking_tokens,
            output_style_id: params
                .output_style
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            output_style_options,
            rewind_policy: params
                .rewind_policy
                .unwrap_or(crate::config::RewindPolicy::AcpWrapper),
            additional_directories_custom: !params.additional_directories.is_empty(),
            allowed_tools_custom: !params.allowed_tools.is_empty(),
            disallowed_tools_custom: !params.disallowed_tools.is_empty(),
            tool_set: params.tools.clone().unwrap_or_default(),
            env_custom: !params.env.is_empty(),
            enable_file_checkpointing: params.enable_file_checkpointing.unwrap_or(true),
            persist_session: params.persist_session.unwrap_or(true),
            max_turns: params.max_turns,
            max_budget_usd: params.max_budget_usd,
            mcp_servers_custom: !params.mcp_servers.is_empty(),
            sandbox_enabled: params.sandbox.unwrap_or(false),
            enable_partial_messages: params.enable_partial_messages.unwrap_or(true),
            betas_custom: !params.betas.is_empty(),
            system_prompt_custom: params.system_prompt.is_some(),
            output_format_custom: params.output_format.is_some(),
            agents_custom: params.agents.is_some(),
            setting_sources_custom: !params.setting_sources.is_empty(),
            fallback_model_custom: params.fallback_model.is_some(),
            user_custom: params.user.is_some(),
            cli_path_custom: params.cli_path.is_some(),
            account_info: None,
        };

        let checkpoints = match &self.transcripts_dir {
            Some(dir) => {
                let checkpoint_session = resume.as_deref().unwrap_or(&session_id);
                let path = session_transcript_path(dir, &params.cwd, checkpoint_session);
                load_user_message_checkpoints(&path).await
            }
            None => Vec::new(),
        };

        let session = Session::new(
            session_id.clone(),
            params.cwd,
            conn,
            config_state,
            checkpoints,
        );
        let config_options = session.config.render_options();
        let available_modes = session.config.available_modes.clone();

        self.sessions
            .borrow_mut()
            .insert(session_id.clone(), Rc::new(RefCell::new(session)));

        tracing::info!("Created session {}", session_id);

        Ok(NewSessionResult {
            session_id,
            config_options,
            current_mode: mode,
            available_modes,
            models,
            current_model_id,
        })
    }

    /// Tear down a session: close every backend handle it ever owned and
    /// drop all cache entries scoped to it. Returns false for unknown ids.
    pub async fn close_session(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.sessions.borrow_mut().remove(session_id) else {
            return Ok(false);
        };

        let controls = {
            let mut session = session.borrow_mut();
            let mut controls = std::mem::take(&mut session.retired_controls);
            controls.push(Rc::clone(&session.control));
            controls
        };
        for control in controls {
            if let Err(err) = control.close().await {
                tracing::error!("Failed to close backend for {}: {}", session_id, err);
            }
        }

        self.background.borrow_mut().remove_session(session_id);
        tracing::info!("Closed session {}", session_id);
        Ok(true)
    }

    /// Cancel the in-flight turn: set the flag and interrupt the backend.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let session = self.session(session_id)?;
        let control = {
            let mut session = session.borrow_mut();
            session.cancelled = true;
            Rc::clone(&session.control)
        };
        control.interrupt().await
    }

    // Config mutation surface.

    /// Apply one configuration mutation and return the refreshed catalog.
    pub async fn set_session_config_option(
        &self,
        session_id: &str,
        config_id: &str,
        value: &str,
    ) -> Result<Vec<ConfigOption>> {
        let session = self.session(session_id)?;
        let mut changed = false;

        match config_id {
            ids::MODEL => {
                let (known, current, control) = {
                    let session = session.borrow();
                    (
                        session
                            .config
                            .model_options
                            .iter()
                            .any(|option| option.value == value),
                        session.config.model_id.clone(),
                        Rc::clone(&session.control),
                    )
                };
                if !known {
                    return Err(invalid_value(config_id, value));
                }
                if current != value {
                    control.set_model(value).await?;
                    session.borrow_mut().config.model_id = value.to_string();
                    changed = true;
                }
            }

            ids::MODE => {
                let mode = PermissionMode::parse(value)
                    .ok_or_else(|| invalid_value(config_id, value))?;
                changed = self.apply_mode_change(&session, mode, true).await?;
            }

            ids::THOUGHT_LEVEL => {
                let level = ThoughtLevel::parse(value)
                    .ok_or_else(|| invalid_value(config_id, value))?;
                let target = level.token_budget();
                let (current_level, current_budget, control) = {
                    let session = session.borrow();
                    (
                        session.config.thought_level,
                        session.config.max_thinking_tokens,
                        Rc::clone(&session.control),
                    )
                };
                if current_level != level || current_budget != target {
                    control.set_max_thinking_tokens(target).await?;
                    let mut session = session.borrow_mut();
                    session.config.thought_level = level;
                    session.config.max_thinking_tokens = target;
                    changed = true;
                }
            }

            ids::MAX_THINKING_TOKENS => {
                let budget = parse_max_value_id(value)
                    .map_err(|_| invalid_value(config_id, value))?;
                let (current, control) = {
                    let session = session.borrow();
                    (
                        session.config.max_thinking_tokens,
                        Rc::clone(&session.control),
                    )
                };
                if current != budget {
                    control.set_max_thinking_tokens(budget).await?;
                    let mut session = session.borrow_mut();
                    session.config.max_thinking_tokens = budget;
                    session.config.thought_level = ThoughtLevel::infer(budget);
                    changed = true;
                }
            }

            ids::OUTPUT_STYLE => {
                let (known, current, control) = {
                    let session = session.borrow();
                    (
                        session
                            .config
                            .output_style_options
                            .iter()
                            .any(|option| option.value == value),
                        session.config.output_style_id.clone(),
                        Rc::clone(&session.control),
                    )
                };
                if !known {
                    return Err(invalid_value(config_id, value));
                }
                if current != value {
                    control.set_output_style(value).await?;
                    session.borrow_mut().config.output_style_id = value.to_string();
                    changed = true;
                }
            }

            ids::ENABLE_PARTIAL_MESSAGES => {
                let enabled = match value {
                    "enabled" => true,
                    "disabled" => false,
                    _ => return Err(invalid_value(config_id, value)),
                };
                // Snapshot-only: there is no backend control call for this;
                // the value applies at the next backend launch.
                let current = session.borrow().config.enable_partial_messages;
                if current != enabled {
                    session.borrow_mut().config.enable_partial_messages = enabled;
                    changed = true;
                }
            }

            ids::MCP_SERVERS => match value {
                "default" => {
                    let (custom, control) = {
                        let session = session.borrow();
                        (
                            session.config.mcp_servers_custom,
                            Rc::clone(&session.control),
                        )
                    };
                    if custom {
                        control.set_mcp_servers(HashMap::new()).await?;
                        session.borrow_mut().config.mcp_servers_custom = false;
                        changed = true;
                    }
                }
                "custom" => {
                    if !session.borrow().config.mcp_servers_custom {
                        return Err(AgentError::InvalidRequest(
                            "Use the set-servers extension call to define custom MCP servers"
                                .to_string(),
                        ));
                    }
                }
                _ => return Err(invalid_value(config_id, value)),
            },

            id if crate::config::CREATION_TIME_ONLY_IDS.contains(&id) => {
                return Err(AgentError::InvalidRequest(format!(
                    "Config option '{}' is creation-time only; set it in the session \
                     creation parameters",
                    id
                )));
            }

            unknown => {
                return Err(AgentError::InvalidRequest(format!(
                    "Unknown config option id: {}",
                    unknown
                )));
            }
        }

        if changed {
            self.emit_config_update(session_id).await?;
        }

        Ok(self.session(session_id)?.borrow().config.render_options())
    }

    /// Switch the session's permission mode.
    pub async fn set_session_mode(&self, session_id: &str, mode_id: &str) -> Result<()> {
        let mode = PermissionMode::parse(mode_id)
            .ok_or_else(|| AgentError::InvalidRequest(format!("Invalid mode: {}", mode_id)))?;
        let session = self.session(session_id)?;
        let changed = self.apply_mode_change(&session, mode, true).await?;
        if changed {
            self.emit_config_update(session_id).await?;
        }
        Ok(())
    }

    /// Switch the session's model.
    pub async fn set_session_model(&self, session_id: &str, model_id: &str) -> Result<()> {
        let options = self.set_session_config_option(session_id, ids::MODEL, model_id).await;
        options.map(|_| ())
    }

    /// Validate and apply a mode transition. With `use_backend_call`, the
    /// backend is told; mode transitions originating from backend events or
    /// from the plan-mode exit skip the round-trip.
    pub(crate) async fn apply_mode_change(
        &self,
        session: &Rc<RefCell<Session>>,
        mode: PermissionMode,
        use_backend_call: bool,
    ) -> Result<bool> {
        let (available, current, control, session_id) = {
            let session = session.borrow();
            (
                session.config.available_modes.clone(),
                session.config.mode,
                Rc::clone(&session.control),
                session.id.clone(),
            )
        };
        if !available.contains(&mode) {
            return Err(AgentError::InvalidRequest(format!(
                "Unsupported mode: {}",
                mode.as_str()
            )));
        }
        if current == mode {
            return Ok(false);
        }

        if use_backend_call {
            control.set_permission_mode(mode).await?;
        }
        session.borrow_mut().config.mode = mode;
        self.emit_mode_update(&session_id, mode).await?;
        Ok(true)
    }

    /// Record a backend-reported mode without a control round-trip.
    pub(crate) fn note_mode_state(&self, session: &Rc<RefCell<Session>>, mode: PermissionMode) -> bool {
        let mut session = session.borrow_mut();
        let changed = session.config.mode != mode;
        session.config.mode = mode;
        changed
    }

    /// Define (or clear) the dynamic MCP server set. This is the
    /// side-channel companion of the `mcp_servers` catalog entry.
    pub async fn set_mcp_servers(
        &self,
        session_id: &str,
        servers: HashMap<String, McpServerConfig>,
    ) -> Result<Vec<ConfigOption>> {
        let session = self.session(session_id)?;
        let control = { Rc::clone(&session.borrow().control) };
        let custom = !servers.is_empty();
        control.set_mcp_servers(servers).await?;

        let changed = {
            let mut session = session.borrow_mut();
            let changed = session.config.mcp_servers_custom != custom;
            session.config.mcp_servers_custom = custom;
            changed
        };
        if changed {
            self.emit_config_update(session_id).await?;
        }
        Ok(session.borrow().config.render_options())
    }

    // Rewind surface.

    /// Resolve `latest`/`previous`/`first`/raw-id to a concrete checkpoint.
    pub fn resolve_rewind_target(&self, session_id: &str, target: &str) -> Result<String> {
        let session = self.session(session_id)?;
        let resolved = session.borrow().resolve_rewind_target(target);
        resolved
    }

    /// Rewind to a checkpoint (or preview with `dry_run`), reporting
    /// feasibility and file-change counts.
    pub async fn rewind_files(
        &self,
        session_id: &str,
        target: &str,
        dry_run: bool,
    ) -> Result<RewindReport> {
        let session = self.session(session_id)?;
        let (resolved, control) = {
            let session = session.borrow();
            (
                session.resolve_rewind_target(target)?,
                Rc::clone(&session.control),
            )
        };
        control.rewind_to(&resolved, dry_run).await
    }

    // Hook delivery surface.

    /// Deliver an out-of-band tool response for a tracked invocation. The
    /// continuation is consume-once; an unknown id is a logged
    /// inconsistency, not an error.
    pub async fn handle_post_tool_use(
        &self,
        session_id: &str,
        tool_use_id: &str,
        tool_response: Value,
    ) -> Result<()> {
        let session = self.session(session_id)?;
        let (hook, tool_name, acp_id) = {
            let mut session = session.borrow_mut();
            let hook = session.pending_hooks.remove(tool_use_id);
            let tool_name = session
                .tool_use_cache
                .get(tool_use_id)
                .map(|record| record.name.clone());
            (hook, tool_name, session.acp_id())
        };

        if hook.is_none() || tool_name.is_none() {
            tracing::warn!(
                "Got a tool response for tool use that wasn't tracked: {}",
                tool_use_id
            );
            return Ok(());
        }

        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update: SessionUpdate::ToolCallUpdate(ToolCallUpdate {
                    id: ToolCallId(Arc::from(tool_use_id)),
                    fields: ToolCallUpdateFields {
                        status: None,
                        kind: None,
                        title: None,
                        content: None,
                        locations: None,
                        raw_input: None,
                        raw_output: None,
                    },
                    meta: None,
                }),
                meta: Some(json!({
                    "claudeCode": {
                        "toolName": tool_name,
                        "toolResponse": tool_response,
                    }
                })),
            })
            .await
    }

    /// Completion-hook path for background tasks. Always treated as
    /// completed; idempotent against the status-notification path.
    pub async fn handle_task_completed(
        &self,
        session_id: &str,
        task: TaskCompletedHook,
    ) -> Result<()> {
        let session = self.session(session_id)?;
        let acp_id = { session.borrow().acp_id() };

        let completion = self
            .background
            .borrow_mut()
            .complete_from_hook(session_id, &task.task_id);
        let record = match completion {
            HookCompletion::AlreadyFinalized | HookCompletion::ForeignSession => return Ok(()),
            HookCompletion::Completed { record } => record,
        };

        let output_file = record
            .as_ref()
            .and_then(|r| r.output_file.clone())
            .filter(|f| !f.is_empty());
        let output_tail = match output_file.as_deref() {
            Some(file) => {
                read_output_tail(file, self.config.tail_max_bytes, self.config.tail_max_lines)
                    .await
            }
            None => None,
        };

        let subject = task.task_subject.trim().to_string();
        let details = task
            .task_description
            .as_deref()
            .map(str::trim)
            .filter(|details| !details.is_empty() && *details != subject);
        let teammate = task
            .teammate_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let mut lines = vec![format!(
            "Background task {} completed{}.",
            task.task_id,
            teammate.map(|t| format!(" ({})", t)).unwrap_or_default()
        )];
        if !subject.is_empty() {
            lines.push(format!("Subject: {}", subject));
        }
        if let Some(details) = details {
            lines.push(format!("Details: {}", details));
        }
        if let Some(file) = output_file.as_deref() {
            lines.push(format!("Output: {}", file));
        }
        if let Some(tail) = output_tail.as_deref() {
            lines.push(format!(
                "Output tail (last {} lines):\n{}",
                tail.lines().count(),
                tail
            ));
        }

        if let Some(record) = &record {
            self.client
                .session_update(SessionNotification {
                    session_id: acp_id.clone(),
                    update: SessionUpdate::ToolCallUpdate(ToolCallUpdate {
                        id: ToolCallId(Arc::from(record.tool_call_id.as_str())),
                        fields: ToolCallUpdateFields {
                            status: Some(ToolCallStatus::Completed),
                            kind: None,
                            title: Some("Background task completed".to_string()),
                            content: (!subject.is_empty()).then(|| {
                                vec![agent_client_protocol::ToolCallContent::Content {
                                    content: ContentBlock::Text(TextContent {
                                        text: subject.clone(),
                                        annotations: None,
                                        meta: None,
                                    }),
                                }]
                            }),
                            locations: output_file.as_deref().map(|file| {
                                vec![ToolCallLocation {
                                    path: PathBuf::from(file),
                                    line: None,
                                    meta: None,
                                }]
                            }),
                            raw_input: None,
                            raw_output: None,
                        },
                        meta: None,
                    }),
                    meta: Some(json!({
                        "claudeCode": {
                            "toolName": record.tool_name.clone(),
                            "backgroundTaskId": task.task_id.clone(),
                            "backgroundOutputFile": output_file.clone(),
                            "taskStatus": "completed",
                        }
                    })),
                })
                .await?;
        }

        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update: SessionUpdate::AgentMessageChunk(agent_client_protocol::ContentChunk {
                    content: ContentBlock::Text(TextContent {
                        text: lines.join("\n"),
                        annotations: None,
                        meta: None,
                    }),
                    meta: None,
                }),
                meta: None,
            })
            .await
    }

    /// Status-notification path for background tasks, driven from the turn
    /// loop when the backend reports a terminal task status.
    pub(crate) async fn complete_background_task(
        &self,
        session_id: &str,
        task: &TaskNotification,
    ) -> Result<()> {
        let completion = self.background.borrow_mut().complete_from_status(
            session_id,
            &task.task_id,
            &task.output_file,
        );
        let record = match completion {
            StatusCompletion::AlreadyFinalized | StatusCompletion::NotTracked => return Ok(()),
            StatusCompletion::Found(record) => record,
        };

        let status = match task.status {
            TaskStatus::Completed => ToolCallStatus::Completed,
            TaskStatus::Failed | TaskStatus::Stopped => ToolCallStatus::Failed,
        };
        let acp_id = { self.session(session_id)?.borrow().acp_id() };

        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update: SessionUpdate::ToolCallUpdate(ToolCallUpdate {
                    id: ToolCallId(Arc::from(record.tool_call_id.as_str())),
                    fields: ToolCallUpdateFields {
                        status: Some(status),
                        kind: None,
                        title: Some(format!("Background task {}", task.status.as_str())),
                        content: (!task.summary.is_empty()).then(|| {
                            vec![agent_client_protocol::ToolCallContent::Content {
                                content: ContentBlock::Text(TextContent {
                                    text: task.summary.clone(),
                                    annotations: None,
                                    meta: None,
                                }),
                            }]
                        }),
                        locations: (!task.output_file.is_empty()).then(|| {
                            vec![ToolCallLocation {
                                path: PathBuf::from(&task.output_file),
                                line: None,
                                meta: None,
                            }]
                        }),
                        raw_input: None,
                        raw_output: None,
                    },
                    meta: None,
                }),
                meta: Some(json!({
                    "claudeCode": {
                        "toolName": record.tool_name,
                        "backgroundTaskId": task.task_id.clone(),
                        "backgroundOutputFile": task.output_file.clone(),
                        "taskStatus": task.status.as_str(),
                    }
                })),
            })
            .await
    }

    /// Human text for a task notification, with a bounded tail preview so
    /// clients need not read large output files themselves.
    pub(crate) async fn format_task_notification(&self, task: &TaskNotification) -> String {
        let summary = task.summary.trim();
        let mut text = format!("Background task {} {}", task.task_id, task.status.as_str());
        if !summary.is_empty() {
            text.push_str(&format!(": {}", summary));
        }
        if task.output_file.is_empty() {
            return text;
        }
        text.push_str(&format!("\nOutput: {}", task.output_file));
        if let Some(tail) = read_output_tail(
            &task.output_file,
            self.config.tail_max_bytes,
            self.config.tail_max_lines,
        )
        .await
        {
            text.push_str(&format!(
                "\nOutput tail (last {} lines):\n{}",
                tail.lines().count(),
                tail
            ));
        }
        text
    }

    // Notification helpers.

    pub(crate) async fn emit_translated(
        &self,
        session: &Rc<RefCell<Session>>,
        updates: Vec<TranslatedUpdate>,
    ) -> Result<()> {
        let (acp_id, session_id) = {
            let session = session.borrow();
            (session.acp_id(), session.id.clone())
        };
        for update in updates {
            if let Some(binding) = &update.background {
                self.background.borrow_mut().register(
                    &session_id,
                    &binding.tool_call_id,
                    &binding.tool_name,
                    binding.task_id.as_deref(),
                    binding.output_file.as_deref(),
                );
            }
            self.client
                .session_update(update.into_notification(&acp_id))
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn emit_mode_update(
        &self,
        session_id: &str,
        mode: PermissionMode,
    ) -> Result<()> {
        let acp_id = self.session(session_id)?.borrow().acp_id();
        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update: SessionUpdate::CurrentModeUpdate(CurrentModeUpdate::new(
                    SessionModeId::new(mode.as_str()),
                )),
                meta: None,
            })
            .await
    }

    pub(crate) async fn emit_config_update(&self, session_id: &str) -> Result<()> {
        let options = {
            let session = self.session(session_id)?;
            let options = session.borrow().config.render_options();
            options
        };
        self.client
            .ext_notification(
                EXT_CONFIG_OPTIONS_UPDATE,
                json!({
                    "sessionId": session_id,
                    "configOptions": options,
                }),
            )
            .await
    }

    pub(crate) async fn emit_session_info(&self, session_id: &str, info: Value) -> Result<()> {
        self.client
            .ext_notification(
                EXT_INFO_UPDATE,
                json!({
                    "sessionId": session_id,
                    "updatedAt": chrono::Utc::now().to_rfc3339(),
                    "claudeCode": info,
                }),
            )
            .await
    }

    /// Fetch (or accept) the command list and notify the client when it
    /// differs from the last-seen set.
    pub(crate) async fn refresh_available_commands(
        &self,
        session_id: &str,
        commands: Option<Vec<SlashCommandInfo>>,
    ) -> Result<()> {
        let session = self.session(session_id)?;
        let commands = match commands {
            Some(commands) => commands,
            None => {
                let control = { Rc::clone(&session.borrow().control) };
                match control.list_commands().await {
                    Ok(commands) => commands,
                    Err(err) => {
                        tracing::error!(
                            "Failed to fetch supported commands for {}: {}",
                            session_id,
                            err
                        );
                        return Ok(());
                    }
                }
            }
        };

        let available = available_commands_from(&commands);
        {
            let session_ref = session.borrow();
            if available_commands_equal(&session_ref.last_available_commands, &available) {
                return Ok(());
            }
        }

        let acp_id = {
            let mut session = session.borrow_mut();
            session.last_available_commands = available.clone();
            session.acp_id()
        };
        self.client
            .session_update(SessionNotification {
                session_id: acp_id,
                update: SessionUpdate::AvailableCommandsUpdate(AvailableCommandsUpdate {
                    available_commands: available,
                    meta: None,
                }),
                meta: None,
            })
            .await
    }

    /// Replay a persisted transcript through the translator with a
    /// replay-local cache; hook registration stays off.
    async fn replay_session_history(&self, session_id: &str, cwd: &std::path::Path) -> Result<()> {
        let Some(dir) = &self.transcripts_dir else {
            return Ok(());
        };
        let path = session_transcript_path(dir, cwd, session_id);
        let acp_id = self.session(session_id)?.borrow().acp_id();

        let mut cache = crate::translator::ToolUseCache::new();
        let mut hooks = crate::translator::PendingHooks::new();

        for entry in read_transcript_entries(&path).await {
            if !matches!(entry.entry_type.as_deref(), Some("user") | Some("assistant")) {
                continue;
            }
            if entry.is_sidechain {
                continue;
            }
            if let Some(entry_session) = &entry.session_id {
                if entry_session != session_id {
                    continue;
                }
            }
            let Some(message) = entry.message else {
                continue;
            };
            let Some(role) = message.role.as_deref() else {
                continue;
            };

            let content: crate::events::MessageContent =
                match serde_json::from_value(message.content.clone()) {
                    Ok(content) => content,
                    Err(_) => continue,
                };

            let cx = ContentCx {
                role: Role::from_str(role),
                parent_tool_use_id: entry.parent_tool_use_id.as_deref(),
                register_hooks: false,
            };
            let updates = translate_content(&content, cx, &mut cache, &mut hooks);
            for update in updates {
                self.client
                    .session_update(update.into_notification(&acp_id))
                    .await?;
            }
        }
        Ok(())
    }
}

fn invalid_value(config_id: &str, value: &str) -> AgentError {
    AgentError::InvalidRequest(format!(
        "Invalid value '{}' for config '{}'",
        value, config_id
    ))
}

/// Pick the startup model: the preferred one when it matches the advertised
/// list (fuzzy, the way humans type model names), otherwise the first.
async fn resolve_startup_model(
    models: &[ModelInfo],
    preferred: Option<&str>,
    control: &Rc<dyn crate::backend::BackendControl>,
) -> Result<String> {
    if models.is_empty() {
        if let Some(preferred) = preferred {
            return Err(AgentError::InvalidRequest(format!(
                "Invalid startup model: {}",
                preferred
            )));
        }
        return Ok("default".to_string());
    }

    let mut current = &models[0];
    if let Some(target) = preferred {
        let target_lower = target.to_lowercase();
        let matched = models.iter().find(|model| {
            model.model_id == target
                || model.model_id.contains(target)
                || target.contains(&model.model_id)
                || model.name.to_lowercase() == target_lower
                || model.name.to_lowercase().contains(&target_lower)
        });
        match matched {
            Some(model) => current = model,
            None => {
                return Err(AgentError::InvalidRequest(format!(
                    "Invalid startup model: {}",
                    target
                )))
            }
        }
    }

    control.set_model(&current.model_id).await?;
    Ok(current.model_id.clone())
}
