//! Error types for the crawler.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request itself failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("Gateway returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The gateway reported a corrupted exchange with the node.
    #[error("Gateway reported {0}")]
    Gateway(String),

    /// No node with this address answered.
    #[error("No route to node {0}")]
    Unreachable(u32),

    /// A scripted or otherwise invalid response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while talking to one mesh node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request did not complete in time.
    #[error("Request '{resource}' timed out after {secs}s")]
    Timeout { resource: String, secs: u64 },

    /// The per-node time budget ran out.
    #[error("{stage} exceeded the {secs}s node budget")]
    Budget { stage: &'static str, secs: u64 },

    /// The reply was well-formed but carried too little data to produce a value.
    #[error("Incomplete response to '{resource}': {message}")]
    Incomplete { resource: String, message: String },

    /// The response did not have the expected shape.
    #[error("Unexpected response to '{resource}': {message}")]
    Parse { resource: String, message: String },
}

impl NodeError {
    /// Whether the failure is a routine gap in the node's data rather
    /// than a fault.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, NodeError::Incomplete { .. })
    }

    /// Create a parse error for a resource.
    pub fn parse(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            resource: resource.into(),
            message: message.into(),
        }
    }
}
