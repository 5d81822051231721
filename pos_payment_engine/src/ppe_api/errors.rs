use thiserror::Error;

use crate::session_types::{DeviceKind, SessionId, SessionState};

#[derive(Debug, Clone, Error)]
pub enum SessionApiError {
    #[error("Session {0} does not exist or has expired")]
    SessionNotFound(SessionId),
    #[error("Invalid amount: {0}. Amounts must be positive and fit the payment device.")]
    InvalidAmount(String),
    #[error("{operation} is not supported for {device} sessions")]
    UnsupportedOperation { device: DeviceKind, operation: &'static str },
    #[error("Session {id} is {state}, which does not allow this operation")]
    InvalidState { id: SessionId, state: SessionState },
    #[error("Could not initialise the payment engine. {0}")]
    Initialization(String),
}
