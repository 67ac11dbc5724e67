//! Error types for the ACP agent adapter

use serde_json::Value;
use thiserror::Error;

/// JSON-RPC 2.0 error structure following ACP specification
#[derive(Debug, Clone)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// Trait for converting errors to JSON-RPC format
///
/// The transport layer sits outside this crate; it calls this trait to turn
/// an [`AgentError`] into the wire error for whatever request failed.
pub trait ToJsonRpcError: std::fmt::Display {
    /// Convert error to JSON-RPC error code
    fn to_json_rpc_code(&self) -> i32;

    /// Convert error to structured error data (optional)
    fn to_error_data(&self) -> Option<Value> {
        None
    }

    /// Convert error to complete JSON-RPC error structure
    fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.to_json_rpc_code(),
            message: self.to_string(),
            data: self.to_error_data(),
        }
    }
}

/// Main error type for the ACP agent adapter
#[derive(Error, Debug)]
pub enum AgentError {
    /// Operation addressed a session id with no live state.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Malformed request rejected at the API boundary before any state change.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend requires authentication before it can serve this turn.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// A blocking permission wait was cancelled out from under the tool call.
    #[error("Tool use aborted: {0}")]
    Aborted(String),

    /// The backend reported a turn-ending failure.
    #[error("Backend process error: {0}")]
    Process(String),

    /// The backend event stream violated its contract.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToJsonRpcError for AgentError {
    fn to_json_rpc_code(&self) -> i32 {
        match self {
            AgentError::InvalidRequest(_) => -32602, // Invalid params
            AgentError::Protocol(_) => -32600,       // Invalid Request
            AgentError::Serialization(_) => -32700,  // Parse error
            AgentError::SessionNotFound(_) => -32000, // Server error
            AgentError::AuthRequired(_) => -32000,   // Server error
            AgentError::Aborted(_) => -32000,        // Server error
            AgentError::Process(_) => -32000,        // Server error
            AgentError::Config(_) => -32000,         // Server error
            _ => -32603,                             // Internal error (default)
        }
    }
}

/// Convenience type alias for Results using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;
