use thiserror::Error;

/// Failure taxonomy of the action dispatcher. Every variant terminates the
/// attempt it came from; recovery is a new caller gesture (or the explicit
/// poll loop, which only retries transient failures).
#[derive(Debug, Error)]
pub enum OnboardingError {
    /// Rejected before any request was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backend returned 401; any stored operator token has been cleared.
    #[error("session expired, authenticate again")]
    SessionExpired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Business-rule conflict reported by the backend. The known
    /// "already connected" case is intercepted before this surfaces.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no merchant registered in the local session")]
    MissingMerchant,

    #[error("local session store failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl OnboardingError {
    /// The server-supplied message, for variants that carry one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            OnboardingError::Forbidden(message)
            | OnboardingError::NotFound(message)
            | OnboardingError::Conflict(message)
            | OnboardingError::Server { message, .. }
            | OnboardingError::Api { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Whether a poll loop may keep going after this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OnboardingError::Transport(_) | OnboardingError::Server { .. }
        )
    }
}
