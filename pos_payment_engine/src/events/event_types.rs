use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session_types::{Session, SessionState};

/// Emitted once when a session reaches a terminal state in which the money was collected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentCompletedEvent {
    pub session: Session,
    pub timestamp: DateTime<Utc>,
}

impl PaymentCompletedEvent {
    pub fn new(session: Session) -> Self {
        Self { session, timestamp: Utc::now() }
    }
}

/// Emitted once when a session ends without collecting payment (declined, cancelled or failed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAbortedEvent {
    pub session: Session,
    pub state: SessionState,
    pub timestamp: DateTime<Utc>,
}

impl PaymentAbortedEvent {
    pub fn new(session: Session) -> Self {
        let state = session.state;
        Self { session, state, timestamp: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    PaymentCompleted(PaymentCompletedEvent),
    PaymentAborted(PaymentAbortedEvent),
}

impl EventType {
    /// The event that announces `session`'s terminal state.
    pub fn for_terminal_session(session: Session) -> Self {
        if session.state.is_success_for(session.device) {
            Self::PaymentCompleted(PaymentCompletedEvent::new(session))
        } else {
            Self::PaymentAborted(PaymentAbortedEvent::new(session))
        }
    }
}
