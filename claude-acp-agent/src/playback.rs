//! Fixture-driven collaborators
//!
//! Spawning a real agent backend is slow and needs credentials. These
//! doubles play scripted event streams and record every control call and
//! notification, so the whole translation pipeline can be exercised
//! hermetically. They live in `src` (not `tests/`) so both the unit suites
//! and the integration suites share them.

use crate::backend::{
    BackendConn, BackendControl, BackendLauncher, ModelInfo, PermissionProbe, RewindReport,
    TurnItem,
};
use crate::config::{McpServerConfig, PermissionMode};
use crate::error::{AgentError, Result};
use crate::events::{SdkEvent, SdkUserMessage, SlashCommandInfo};
use crate::permissions::{PermissionOutcome, PermissionRequest, PermissionResult};
use agent_client_protocol::{SessionNotification, SessionUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};

/// One scripted item emitted in response to a user message.
#[derive(Debug, Clone)]
pub enum ScriptItem {
    /// A raw backend event, as JSON.
    Event(Value),
    /// An in-band permission probe for a pending tool call.
    Permission {
        tool_name: String,
        tool_use_id: String,
        input: Value,
    },
    /// End the event stream (backend went away).
    CloseStream,
}

/// A recorded control call, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    SendUserMessage(Value),
    SetModel(String),
    SetPermissionMode(PermissionMode),
    SetOutputStyle(String),
    SetMaxThinkingTokens(Option<u32>),
    SetMcpServers(Vec<String>),
    ListCommands,
    ListModels,
    RewindTo { message_id: String, dry_run: bool },
    Interrupt,
    Close,
}

/// Script for one backend conversation: a queue of turns, each a list of
/// items queued when a user message arrives.
#[derive(Debug, Clone, Default)]
pub struct BackendScript {
    pub turns: Vec<Vec<ScriptItem>>,
    pub models: Vec<ModelInfo>,
    pub commands: Vec<SlashCommandInfo>,
}

/// Backend double that plays a [`BackendScript`].
pub struct ScriptedBackend {
    turns: RefCell<VecDeque<Vec<ScriptItem>>>,
    models: Vec<ModelInfo>,
    commands: Vec<SlashCommandInfo>,
    events_tx: RefCell<Option<mpsc::Sender<TurnItem>>>,
    pub calls: RefCell<Vec<ControlCall>>,
    /// Receivers for emitted permission probes, in emission order. Tests
    /// inspect these to see what decision the agent returned.
    pub permission_receivers: RefCell<Vec<oneshot::Receiver<PermissionResult>>>,
}

impl ScriptedBackend {
    fn new(script: BackendScript, events_tx: mpsc::Sender<TurnItem>) -> Self {
        Self {
            turns: RefCell::new(script.turns.into()),
            models: script.models,
            commands: script.commands,
            events_tx: RefCell::new(Some(events_tx)),
            calls: RefCell::new(Vec::new()),
            permission_receivers: RefCell::new(Vec::new()),
        }
    }

    fn record(&self, call: ControlCall) {
        self.calls.borrow_mut().push(call);
    }

    async fn play_turn(&self) -> Result<()> {
        let Some(items) = self.turns.borrow_mut().pop_front() else {
            // Nothing scripted: end the stream so loops terminate.
            self.events_tx.borrow_mut().take();
            return Ok(());
        };

        for item in items {
            let sender = self.events_tx.borrow().clone();
            match item {
                ScriptItem::Event(value) => {
                    let event: SdkEvent = serde_json::from_value(value).map_err(|err| {
                        AgentError::Internal(format!("Malformed scripted event: {}", err))
                    })?;
                    if let Some(sender) = sender {
                        let _ = sender.send(TurnItem::Event(event)).await;
                    }
                }
                ScriptItem::Permission {
                    tool_name,
                    tool_use_id,
                    input,
                } => {
                    let (respond, receiver) = oneshot::channel();
                    self.permission_receivers.borrow_mut().push(receiver);
                    if let Some(sender) = sender {
                        let _ = sender
                            .send(TurnItem::Permission(PermissionProbe {
                                tool_name,
                                tool_use_id,
                                input,
                                respond,
                            }))
                            .await;
                    }
                }
                ScriptItem::CloseStream => {
                    self.events_tx.borrow_mut().take();
                }
            }
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl BackendControl for ScriptedBackend {
    async fn send_user_message(&self, message: SdkUserMessage) -> Result<()> {
        self.record(ControlCall::SendUserMessage(serde_json::to_value(&message)?));
        self.play_turn().await
    }

    async fn set_model(&self, model_id: &str) -> Result<()> {
        self.record(ControlCall::SetModel(model_id.to_string()));
        Ok(())
    }

    async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.record(ControlCall::SetPermissionMode(mode));
        Ok(())
    }

    async fn set_output_style(&self, style: &str) -> Result<()> {
        self.record(ControlCall::SetOutputStyle(style.to_string()));
        Ok(())
    }

    async fn set_max_thinking_tokens(&self, budget: Option<u32>) -> Result<()> {
        self.record(ControlCall::SetMaxThinkingTokens(budget));
        Ok(())
    }

    async fn set_mcp_servers(&self, servers: HashMap<String, McpServerConfig>) -> Result<()> {
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        self.record(ControlCall::SetMcpServers(names));
        Ok(())
    }

    async fn list_commands(&self) -> Result<Vec<SlashCommandInfo>> {
        self.record(ControlCall::ListCommands);
        Ok(self.commands.clone())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.record(ControlCall::ListModels);
        Ok(self.models.clone())
    }

    async fn rewind_to(&self, message_id: &str, dry_run: bool) -> Result<RewindReport> {
        self.record(ControlCall::RewindTo {
            message_id: message_id.to_string(),
            dry_run,
        });
        Ok(RewindReport {
            feasible: true,
            files_changed: 0,
        })
    }

    async fn interrupt(&self) -> Result<()> {
        self.record(ControlCall::Interrupt);
        // Interruption ends the stream, like a backend abandoning the turn.
        self.events_tx.borrow_mut().take();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(ControlCall::Close);
        self.events_tx.borrow_mut().take();
        Ok(())
    }
}

/// Launcher double: hands out scripted backends in order.
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: RefCell<VecDeque<BackendScript>>,
    pub launched: RefCell<Vec<Rc<ScriptedBackend>>>,
    pub launch_options: RefCell<Vec<crate::backend::LaunchOptions>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<BackendScript>) -> Self {
        Self {
            scripts: RefCell::new(scripts.into()),
            launched: RefCell::new(Vec::new()),
            launch_options: RefCell::new(Vec::new()),
        }
    }

    /// The backend from the nth launch.
    pub fn backend(&self, index: usize) -> Rc<ScriptedBackend> {
        Rc::clone(&self.launched.borrow()[index])
    }
}

#[async_trait(?Send)]
impl BackendLauncher for ScriptedLauncher {
    async fn launch(&self, options: crate::backend::LaunchOptions) -> Result<BackendConn> {
        self.launch_options.borrow_mut().push(options);
        let script = self.scripts.borrow_mut().pop_front().unwrap_or_default();
        let (events_tx, events_rx) = mpsc::channel(1024);
        let backend = Rc::new(ScriptedBackend::new(script, events_tx));
        self.launched.borrow_mut().push(Rc::clone(&backend));
        Ok(BackendConn {
            events: events_rx,
            control: backend,
        })
    }
}

/// Client double recording notifications and feeding scripted permission
/// outcomes.
pub struct RecordingClient {
    pub notifications: RefCell<Vec<SessionNotification>>,
    pub ext_notifications: RefCell<Vec<(String, Value)>>,
    pub permission_requests: RefCell<Vec<PermissionRequest>>,
    outcomes: RefCell<VecDeque<PermissionOutcome>>,
}

impl Default for RecordingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingClient {
    pub fn new() -> Self {
        Self {
            notifications: RefCell::new(Vec::new()),
            ext_notifications: RefCell::new(Vec::new()),
            permission_requests: RefCell::new(Vec::new()),
            outcomes: RefCell::new(VecDeque::new()),
        }
    }

    /// Queue the outcome for the next permission request. With an empty
    /// queue, requests resolve to selecting `allow`.
    pub fn push_outcome(&self, outcome: PermissionOutcome) {
        self.outcomes.borrow_mut().push_back(outcome);
    }

    pub fn select(&self, option_id: &str) {
        self.push_outcome(PermissionOutcome::Selected {
            option_id: option_id.to_string(),
        });
    }

    /// Updates of one variant, for terse assertions.
    pub fn updates(&self) -> Vec<SessionUpdate> {
        self.notifications
            .borrow()
            .iter()
            .map(|n| n.update.clone())
            .collect()
    }

    pub fn ext_methods(&self) -> Vec<String> {
        self.ext_notifications
            .borrow()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }
}

#[async_trait(?Send)]
impl crate::client::AgentClient for RecordingClient {
    async fn session_update(&self, notification: SessionNotification) -> Result<()> {
        self.notifications.borrow_mut().push(notification);
        Ok(())
    }

    async fn request_permission(&self, request: PermissionRequest) -> Result<PermissionOutcome> {
        self.permission_requests.borrow_mut().push(request);
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(PermissionOutcome::Selected {
                option_id: "allow".to_string(),
            }))
    }

    async fn ext_notification(&self, method: &str, params: Value) -> Result<()> {
        self.ext_notifications
            .borrow_mut()
            .push((method.to_string(), params));
        Ok(())
    }
}
