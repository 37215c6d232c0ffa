use crate::session_state::{InterviewStatus, Stage};

/// Errors surfaced by the interview workflow and the service facade.
///
/// Caller-facing variants carry a message that is safe to show to the
/// candidate or the calling client. `Collaborator`, `StateCorruption` and
/// `Store` are internal: they are logged with full context and mapped to a
/// generic failure at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Session {token} is not accepting responses (status: {status})")]
    Inactive {
        token: String,
        status: InterviewStatus,
    },
    #[error("Invalid request: {0}")]
    InvalidState(String),
    #[error("Interview for session {0} is not completed yet")]
    NotCompleted(String),
    #[error("Processing for session {0} exceeded the turn time budget")]
    TimedOut(String),
    #[error("Stage {stage} failed: {detail}")]
    Collaborator { stage: Stage, detail: String },
    #[error("Stored session {token} could not be reconstructed: {detail}")]
    StateCorruption { token: String, detail: String },
    #[error("Session store failure: {0}")]
    Store(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }

    /// HTTP-style status code for callers that expose the service over a transport.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration(_) | Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Inactive { .. } | Self::InvalidState(_) | Self::NotCompleted(_) => 409,
            Self::TimedOut(_) => 504,
            Self::Collaborator { .. } | Self::StateCorruption { .. } | Self::Store(_) => 500,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code() == 500
    }

    /// The message a caller may see. Internal failures are collapsed.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "Internal error while processing the interview".to_string()
        } else {
            self.to_string()
        }
    }
}
