use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: cannot {action} a session that is {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl HandoffError {
    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("Session {}", id))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Display, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            action: action.into(),
        }
    }

    /// Stable error code used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Transport(_) => "transport",
            Self::Database(_) | Self::Config(_) | Self::Io(_) | Self::Other(_) => "internal",
        }
    }

    /// Only transport failures are worth retrying; everything else is terminal
    /// for the request that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Rebuild an error from a wire `code` + message pair.
    pub fn from_wire(code: &str, message: String) -> Self {
        match code {
            "not_found" => Self::NotFound(message),
            "validation" => Self::Validation(message),
            "invalid_transition" => Self::InvalidTransition {
                from: "unknown".to_string(),
                action: message,
            },
            "transport" => Self::Transport(message),
            _ => Self::Other(message),
        }
    }
}

pub type Result<T, E = HandoffError> = std::result::Result<T, E>;
