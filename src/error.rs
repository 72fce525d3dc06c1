//! Error taxonomy for MCP Guardian.
//!
//! Follows the same 3-tier shape as `turbomcp-proxy`'s error module: errors
//! that originate in the upstream client, errors that originate in the
//! domain logic (canonicalization, snapshotting), and errors that cross the
//! storage boundary. Every variant here corresponds to one of the kinds
//! named in spec §7.

use thiserror::Error;

/// Crate-wide result alias.
pub type GuardianResult<T> = std::result::Result<T, GuardianError>;

/// Top-level error type for MCP Guardian.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GuardianError {
    /// Bad input to an admin operation: invalid name, invalid URL, frequency
    /// below the configured minimum, or a duplicate service name.
    #[error("validation error: {0}")]
    Validation(String),

    /// No such service or snapshot.
    #[error("not found: {0}")]
    NotFound(String),

    /// The upstream could not be reached at the transport level.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The upstream did not respond before the configured deadline.
    #[error("upstream timeout after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    /// The upstream responded but violated the JSON-RPC/MCP contract
    /// (non-2xx status, malformed body, missing fields).
    #[error("upstream protocol error: {0}")]
    UpstreamProtocolError(String),

    /// The upstream returned a well-formed JSON-RPC error object.
    #[error("upstream JSON-RPC error {code}: {message}")]
    JsonRpcError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The capability surface could not be reduced to canonical form.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] crate::canonical::CanonicalizationError),

    /// Two items in the same listing share a sort key (e.g. two tools named
    /// the same thing): the upstream is malformed.
    #[error("snapshot ambiguous: {0}")]
    SnapshotAmbiguous(String),

    /// Repository-level failure. Never silently swallowed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl GuardianError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<reqwest::Error> for GuardianError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout(std::time::Duration::from_secs(0))
        } else if e.is_connect() {
            Self::UpstreamUnreachable(e.to_string())
        } else {
            Self::UpstreamProtocolError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GuardianError {
    fn from(e: serde_json::Error) -> Self {
        Self::UpstreamProtocolError(format!("malformed JSON-RPC body: {e}"))
    }
}

impl From<config::ConfigError> for GuardianError {
    fn from(e: config::ConfigError) -> Self {
        Self::Validation(format!("config error: {e}"))
    }
}
