//! Backend collaborator seam
//!
//! The agent execution engine is an external collaborator: it consumes user
//! messages and control calls, and produces the ordered event stream this
//! crate translates. [`BackendConn`] is one live conversation: a receiver of
//! [`TurnItem`]s plus a cheap, identity-comparable control handle.
//!
//! Permission checks arrive in-band as [`TurnItem::Permission`] carrying a
//! one-shot responder. The turn loop answers them inline, which is what keeps
//! the whole translator single-threaded and lock-free: a permission decision
//! is just another suspension point of the same cooperative loop.

use crate::config::{McpServerConfig, PermissionMode, ToolSetConfig};
use crate::error::Result;
use crate::events::{SdkEvent, SdkUserMessage, SlashCommandInfo};
use crate::permissions::PermissionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};

/// One item pulled from a conversation's stream.
#[derive(Debug)]
pub enum TurnItem {
    /// A translated protocol event.
    Event(SdkEvent),
    /// An in-band permission check for a pending tool invocation.
    Permission(PermissionProbe),
}

/// A blocking permission check from the backend. The receiver must answer
/// through `respond` before the backend will continue the tool call.
#[derive(Debug)]
pub struct PermissionProbe {
    pub tool_name: String,
    pub tool_use_id: String,
    pub input: Value,
    pub respond: oneshot::Sender<PermissionResult>,
}

/// One model the backend can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Feasibility report for a rewind control call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindReport {
    pub feasible: bool,
    #[serde(default)]
    pub files_changed: u32,
}

/// Control surface of one backend conversation.
///
/// Handles are shared (`Rc`) so interrupts can race an in-flight event read
/// without any lock on the event receiver.
#[async_trait(?Send)]
pub trait BackendControl {
    /// Submit one user message into the conversation.
    async fn send_user_message(&self, message: SdkUserMessage) -> Result<()>;

    async fn set_model(&self, model_id: &str) -> Result<()>;

    async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()>;

    async fn set_output_style(&self, style: &str) -> Result<()>;

    async fn set_max_thinking_tokens(&self, budget: Option<u32>) -> Result<()>;

    async fn set_mcp_servers(&self, servers: HashMap<String, McpServerConfig>) -> Result<()>;

    /// Slash commands currently supported by the conversation.
    async fn list_commands(&self) -> Result<Vec<SlashCommandInfo>>;

    /// Models the conversation can be switched between.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Ask the backend whether rewinding to a checkpoint is possible, and
    /// apply it unless `dry_run`.
    async fn rewind_to(&self, message_id: &str, dry_run: bool) -> Result<RewindReport>;

    /// Interrupt the in-flight turn.
    async fn interrupt(&self) -> Result<()>;

    /// Tear the conversation down. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// A live backend conversation: the event stream plus its control handle.
///
/// The `control` Rc is the session's opaque backend handle. Context resets
/// replace it wholesale; `Rc::ptr_eq` distinguishes old from new.
pub struct BackendConn {
    pub events: mpsc::Receiver<TurnItem>,
    pub control: Rc<dyn BackendControl>,
}

/// Creation-time options resolved for one backend launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub cwd: PathBuf,
    pub session_id: String,
    /// Resume an existing conversation by id instead of starting fresh.
    pub resume: Option<String>,
    pub fork_session: bool,
    pub mode: PermissionMode,
    pub allow_bypass: bool,
    pub include_partial_messages: bool,
    pub max_thinking_tokens: Option<u32>,
    pub model: Option<String>,
    pub mcp_servers: HashMap<String, McpServerConfig>,
    pub additional_directories: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub tool_set: ToolSetConfig,
    pub env: HashMap<String, String>,
    pub enable_file_checkpointing: bool,
    pub persist_session: bool,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub sandbox: bool,
    pub betas: Vec<String>,
    pub system_prompt: Option<Value>,
    pub output_format: Option<Value>,
    pub agents: Option<Value>,
    pub setting_sources: Vec<String>,
    pub fallback_model: Option<String>,
    pub user: Option<String>,
    pub cli_path: Option<String>,
}

/// Creates backend conversations. Invoked at session creation and when a
/// plan-mode exit replaces the conversation handle with a fresh one.
#[async_trait(?Send)]
pub trait BackendLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<BackendConn>;
}
