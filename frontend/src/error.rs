//! Error types shared by the services and hooks.

use crate::domain::money::MoneyValidationError;
use shared::AttendanceStatus;
use thiserror::Error;

/// Failure of a single backend call. Every variant is recoverable; the
/// caller keeps its previous state and surfaces the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request never produced a response (connection refused, timeout).
    #[error("Network error: {0}")]
    Transport(String),

    /// The backend answered `{status: "error"}` or any non-success status.
    #[error("{message}")]
    Backend { message: String },

    /// Non-2xx HTTP status.
    #[error("Server error {status}: {body}")]
    Http { status: u16, body: String },

    /// The body was not the JSON we expected.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn backend(message: impl Into<String>) -> Self {
        ApiError::Backend {
            message: message.into(),
        }
    }

    /// Message to show the operator. Backend messages are passed through
    /// verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Backend { message } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Why a view action was refused or failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("Patient {0} is not on the current roster")]
    UnknownPatient(u64),

    #[error("Patient {patient_id} is already marked {status} for this day")]
    AlreadyMarked { patient_id: u64, status: AttendanceStatus },

    #[error("Action not available while {state}")]
    InvalidState { state: &'static str },

    #[error("This role is not allowed to {0}")]
    NotPermitted(&'static str),

    #[error("{0}")]
    Validation(MoneyValidationError),

    #[error("Please enter a reason for rejecting")]
    MissingRejectionReason,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<MoneyValidationError> for ActionError {
    fn from(err: MoneyValidationError) -> Self {
        ActionError::Validation(err)
    }
}
