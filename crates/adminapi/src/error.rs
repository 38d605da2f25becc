use shell_core::SessionError;
use thiserror::Error;

/// Numeric AdminAPI error codes attached to precondition failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    GroupHasNoQuorum,
    NotManaged,
    ManagedInCluster,
    ManagedInReplicaSet,
    NotOnline,
}

impl ErrorCode {
    pub fn value(self) -> u32 {
        match self {
            ErrorCode::GroupHasNoQuorum => 51011,
            ErrorCode::NotManaged => 51300,
            ErrorCode::ManagedInCluster => 51301,
            ErrorCode::ManagedInReplicaSet => 51302,
            ErrorCode::NotOnline => 51314,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    /// The target is not in a state that allows the operation.
    #[error("{message}")]
    Precondition {
        message: String,
        code: Option<ErrorCode>,
    },

    /// The metadata schema version forbids the operation.
    #[error("{0}")]
    Metadata(String),

    #[error("{0}")]
    Runtime(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl AdminError {
    pub fn runtime(message: impl Into<String>) -> Self {
        AdminError::Runtime(message.into())
    }

    pub(crate) fn precondition(message: impl Into<String>, code: Option<ErrorCode>) -> Self {
        AdminError::Precondition {
            message: message.into(),
            code,
        }
    }

    /// AdminAPI error code, when the failure carries one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AdminError::Precondition { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether the connection to the target is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AdminError::Session(e) if e.is_connection_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let err = AdminError::precondition("no quorum", Some(ErrorCode::GroupHasNoQuorum));
        assert_eq!(err.code().map(ErrorCode::value), Some(51011));
        assert_eq!(err.to_string(), "no quorum");
        assert_eq!(AdminError::runtime("x").code(), None);
    }

    #[test]
    fn test_session_errors_pass_through() {
        let err: AdminError = SessionError::Closed.into();
        assert!(err.is_connection_error());
        assert_eq!(err.to_string(), "The session is not open");
    }
}
