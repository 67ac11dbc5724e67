//! Claude ACP Agent
//!
//! A Rust library that bridges the Claude agent SDK event stream to the
//! Agent Client Protocol (ACP): it reconstructs tool-call lifecycles from
//! the flat event stream, correlates background work, arbitrates tool
//! permissions through the client, and keeps a per-session configuration
//! catalog synchronized with both sides.
//!
//! The backend execution engine and the client transport are external
//! collaborators behind the [`backend::BackendControl`] /
//! [`backend::BackendLauncher`] and [`client::AgentClient`] seams; this
//! crate owns the stateful translation in between.

pub mod agent;
pub mod agent_permissions;
pub mod agent_prompt_handling;
pub mod backend;
pub mod background;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod permissions;
pub mod playback;
pub mod session;
pub mod tool_classification;
pub mod translator;

pub use agent::{ClaudeAcpAgent, NewSessionResult, TaskCompletedHook};
pub use backend::{BackendConn, BackendControl, BackendLauncher, LaunchOptions, ModelInfo, RewindReport};
pub use client::AgentClient;
pub use config::{
    AgentConfig, ConfigOption, McpServerConfig, NewSessionParams, PermissionMode, ThoughtLevel,
};
pub use error::{AgentError, Result};
pub use permissions::{PermissionOutcome, PermissionRequest, PermissionResult};
