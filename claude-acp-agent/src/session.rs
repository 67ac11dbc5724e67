//! Per-session state
//!
//! One [`Session`] per logical conversation: the live backend conversation
//! handle (plus the history of retired handles kept for cleanup), the
//! cancellation flag, the configuration snapshot, the session-scoped
//! translation caches, and the checkpoint list usable as rewind targets.

use crate::backend::{BackendConn, BackendControl, TurnItem};
use crate::config::SessionConfigState;
use crate::error::{AgentError, Result};
use crate::translator::{PendingHooks, ToolUseCache};
use agent_client_protocol::{AvailableCommand, SessionId};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tokio::sync::{mpsc, Mutex};

/// State record for one active session.
pub struct Session {
    pub id: String,
    pub cwd: PathBuf,
    /// Event stream of the current backend conversation. Locked only by the
    /// turn loop; one turn per session at a time.
    pub events: Rc<Mutex<mpsc::Receiver<TurnItem>>>,
    /// Control handle of the current backend conversation. Replaced
    /// wholesale when context is reset.
    pub control: Rc<dyn BackendControl>,
    /// Retired backend handles, oldest first, kept for teardown.
    pub retired_controls: Vec<Rc<dyn BackendControl>>,
    /// Set by an explicit cancel request; cleared at the start of each turn.
    pub cancelled: bool,
    pub config: SessionConfigState,
    pub tool_use_cache: ToolUseCache,
    pub pending_hooks: PendingHooks,
    /// Rewind targets, oldest first; bounded by the registry.
    pub checkpoints: Vec<String>,
    pub last_available_commands: Vec<AvailableCommand>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        cwd: PathBuf,
        conn: BackendConn,
        config: SessionConfigState,
        checkpoints: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            cwd,
            events: Rc::new(Mutex::new(conn.events)),
            control: conn.control,
            retired_controls: Vec::new(),
            cancelled: false,
            config,
            tool_use_cache: ToolUseCache::new(),
            pending_hooks: PendingHooks::new(),
            checkpoints,
            last_available_commands: Vec::new(),
        }
    }

    pub fn acp_id(&self) -> SessionId {
        SessionId::new(self.id.as_str())
    }

    /// Swap in a fresh backend conversation. The old handle is appended to
    /// the retirement history, not closed here — teardown owns closing.
    pub fn replace_backend(&mut self, conn: BackendConn) {
        let old = std::mem::replace(&mut self.control, conn.control);
        self.retired_controls.push(old);
        self.events = Rc::new(Mutex::new(conn.events));
    }

    /// Append a checkpoint, deduplicating consecutive ids and evicting the
    /// oldest past `cap`.
    pub fn push_checkpoint(&mut self, uuid: &str, cap: usize) {
        if self.checkpoints.last().map(|last| last.as_str()) == Some(uuid) {
            return;
        }
        self.checkpoints.push(uuid.to_string());
        while self.checkpoints.len() > cap {
            self.checkpoints.remove(0);
        }
    }

    /// Resolve a rewind-target alias to a concrete checkpoint id.
    ///
    /// `latest`, `previous`, and `first` address the checkpoint list; any
    /// other value passes through as a raw id.
    pub fn resolve_rewind_target(&self, target: &str) -> Result<String> {
        let missing = || {
            AgentError::InvalidRequest(format!(
                "No checkpoint available for rewind target '{}'",
                target
            ))
        };
        match target {
            "latest" => self.checkpoints.last().cloned().ok_or_else(missing),
            "previous" => {
                if self.checkpoints.len() >= 2 {
                    Ok(self.checkpoints[self.checkpoints.len() - 2].clone())
                } else {
                    Err(missing())
                }
            }
            "first" => self.checkpoints.first().cloned().ok_or_else(missing),
            raw => Ok(raw.to_string()),
        }
    }
}

/// One row of the externally-maintained transcript log.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptEntry {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    #[serde(rename = "isSidechain", default)]
    pub is_sidechain: bool,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub uuid: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub message: Option<TranscriptMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMessage {
    pub role: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Encode a project path the way the transcript store names its
/// directories: separators become dashes.
pub fn encode_project_path(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            other => other,
        })
        .collect()
}

/// Path of the transcript log for one session.
pub fn session_transcript_path(config_dir: &Path, cwd: &Path, session_id: &str) -> PathBuf {
    config_dir
        .join("projects")
        .join(encode_project_path(cwd))
        .join(format!("{}.jsonl", session_id))
}

/// Parse the transcript log into entries, skipping malformed rows.
pub async fn read_transcript_entries(path: &Path) -> Vec<TranscriptEntry> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<TranscriptEntry>(line).ok())
        .collect()
}

/// Reconstruct the checkpoint list from the transcript log: top-level user
/// rows with a uuid, deduplicated, in order. Missing or unreadable
/// transcripts yield an empty list.
pub async fn load_user_message_checkpoints(path: &Path) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut checkpoints = Vec::new();
    for entry in read_transcript_entries(path).await {
        if entry.entry_type.as_deref() != Some("user") {
            continue;
        }
        if entry.parent_tool_use_id.is_some() {
            continue;
        }
        let Some(uuid) = entry.uuid.filter(|u| !u.is_empty()) else {
            continue;
        };
        if seen.insert(uuid.clone()) {
            checkpoints.push(uuid);
        }
    }
    checkpoints
}
