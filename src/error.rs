//! Crate-wide error taxonomy.
//!
//! One enum, one variant per distinct error kind the crate can raise.
//! Every variant carries a human-readable message (via its
//! `#[error(...)]` format string) and doubles as the machine-readable "kind
//! tag" callers can match on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // ---- Configuration errors ----
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("MCP server not found: {0}")]
    MCPServerNotFound(String),

    // ---- Input errors ----
    #[error("input rejected: {0}")]
    InputRejected(String),

    #[error("input too long: {field} ({len} > {max})")]
    InputTooLong {
        field: String,
        len: usize,
        max: usize,
    },

    #[error("tool input invalid: field `{field}`: {reason}")]
    ToolInputInvalid { field: String, reason: String },

    #[error("agent not in crew: {0}")]
    AgentNotInCrew(String),

    #[error("step handler missing: {0}")]
    StepHandlerMissing(String),

    // ---- Transport errors ----
    #[error("provider request failed: status {status}: {body}")]
    ProviderRequestFailed { status: u16, body: String },

    #[error("MCP connection error: {0}")]
    MCPConnectionException(String),

    // ---- Execution errors ----
    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("MCP execution error {code}: {message}")]
    MCPExecutionException { code: i64, message: String },

    #[error("step failed: {0}")]
    StepFailed(String),

    // ---- Resource errors ----
    #[error("crew timed out after {0:?}")]
    CrewTimedOut(std::time::Duration),

    #[error("flow timed out after {0:?}")]
    FlowTimedOut(std::time::Duration),

    // ---- Deferred-execution ----
    #[error("tool not allowed for rehydration: {0}")]
    ToolNotAllowed(String),

    // ---- Ambient ----
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
