//! Error types for agentflow operations

/// Result type for agentflow operations
pub type Result<T> = std::result::Result<T, AgentflowError>;

/// Error types for the agentflow core
#[derive(Debug, thiserror::Error)]
pub enum AgentflowError {
    /// The model service is unreachable or returned a transport-level failure
    #[error("Transport error ({provider}): {message}")]
    Transport { provider: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tool execution failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl AgentflowError {
    /// Create a transport error for a provider
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        AgentflowError::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentflowError::Transport { .. })
    }
}

impl From<String> for AgentflowError {
    fn from(s: String) -> Self {
        AgentflowError::Other(s)
    }
}

impl From<&str> for AgentflowError {
    fn from(s: &str) -> Self {
        AgentflowError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for AgentflowError {
    fn from(err: anyhow::Error) -> Self {
        AgentflowError::Other(err.to_string())
    }
}
