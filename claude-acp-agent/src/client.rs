//! Client transport seam
//!
//! The framing/transport that carries JSON between this agent and an ACP
//! client lives outside this crate. [`AgentClient`] is the narrow surface the
//! translator needs: push one ordered notification, block for one permission
//! decision, and push extension notifications for vocabulary the pinned
//! protocol version does not carry natively.

use crate::error::Result;
use crate::permissions::{PermissionOutcome, PermissionRequest};
use agent_client_protocol::SessionNotification;
use async_trait::async_trait;
use serde_json::Value;

/// Extension notification: the full re-rendered config option catalog.
pub const EXT_CONFIG_OPTIONS_UPDATE: &str = "session/config_options_update";
/// Extension notification: per-turn token usage and context-window estimate.
pub const EXT_USAGE_UPDATE: &str = "session/usage_update";
/// Extension notification: session info (account, model, servers).
pub const EXT_INFO_UPDATE: &str = "session/info_update";

/// Connection to the ACP client, as seen from the translator.
#[async_trait(?Send)]
pub trait AgentClient {
    /// Push one outbound notification. Ordered, fire-and-forget.
    async fn session_update(&self, notification: SessionNotification) -> Result<()>;

    /// Block for a single permission decision from the client.
    async fn request_permission(&self, request: PermissionRequest) -> Result<PermissionOutcome>;

    /// Push one extension notification (method + JSON params).
    async fn ext_notification(&self, method: &str, params: Value) -> Result<()>;
}
