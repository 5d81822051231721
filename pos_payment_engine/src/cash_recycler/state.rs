//! How cash sessions are read off the machine's polling endpoints.
//!
//! The machine only reports a sparse snapshot of the transaction in progress and reverts to `IDLE` both before a
//! transaction starts and once it is over. The session state is therefore derived from the combination of the latest
//! reading and what earlier readings already established.
use cash_recycler_tools::{ActiveTransaction, LastTransaction};
use log::*;
use pos_common::MinorUnits;

use crate::session_types::{CashDetails, SessionState};

/// A normalised reading from the active-transaction endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub idle: bool,
    pub operation: String,
    pub details: CashDetails,
}

impl Observation {
    pub fn event_tag(&self) -> String {
        format!("operation:{}", self.operation)
    }
}

pub fn record_observation(reading: &ActiveTransaction) -> Observation {
    let idle = reading.operation.is_idle();
    let details = CashDetails {
        inserted: reading.inserted.unwrap_or_default(),
        dispensed: reading.dispensed.unwrap_or_default(),
        not_dispensed: reading.not_dispensed.unwrap_or_default(),
        seen_active: !idle,
        ..Default::default()
    };
    Observation { idle, operation: reading.operation.to_string(), details }
}

fn completed_state(details: &CashDetails) -> SessionState {
    if details.not_dispensed.is_zero() {
        SessionState::Finished
    } else {
        SessionState::FinishedManual
    }
}

/// The state implied by the latest reading.
///
/// `details` must already include the reading. `grace_elapsed` tells whether the machine has had long enough to pick
/// up the payment; until then an idle machine that was never seen working is simply read as not started yet, unless
/// the POS has already cancelled the session.
pub fn derive_state(
    current: SessionState,
    idle: bool,
    details: &CashDetails,
    requested: MinorUnits,
    grace_elapsed: bool,
    cancel_requested: bool,
) -> SessionState {
    let fully_paid = details.inserted >= requested;
    if !idle {
        return match current {
            SessionState::Approved => SessionState::Approved,
            _ if fully_paid => SessionState::Paid,
            _ => SessionState::InProgress,
        };
    }
    let completion_seen = matches!(current, SessionState::Paid | SessionState::Approved);
    if fully_paid || completion_seen {
        return completed_state(details);
    }
    if !details.seen_active && !grace_elapsed && !cancel_requested {
        return current;
    }
    SessionState::Cancelled
}

/// The final state of a session that ran out of time.
pub fn timeout_state(details: &CashDetails) -> SessionState {
    if details.inserted.is_positive() {
        completed_state(details)
    } else {
        SessionState::Cancelled
    }
}

/// True if the session is about to be finalised without knowing how much change was handed out.
pub fn needs_last_transaction(
    current: SessionState,
    idle: bool,
    details: &CashDetails,
    requested: MinorUnits,
) -> bool {
    let completed = matches!(current, SessionState::Paid | SessionState::Approved) || details.inserted >= requested;
    idle && completed && details.dispensed.is_zero() && details.not_dispensed.is_zero() &&
        !details.last_transaction_checked
}

/// Fills in the dispense figures from the last-transaction endpoint.
///
/// If the machine reports a different reference, the amounts belong to another transaction and are left alone.
pub fn apply_last_transaction(details: &mut CashDetails, last: &LastTransaction) {
    details.last_transaction_checked = true;
    if let (Some(ours), Some(theirs)) = (details.reference.as_deref(), last.reference.as_deref()) {
        if ours != theirs {
            warn!("💵️ The last transaction on the machine is {theirs}, not {ours}. Ignoring its figures.");
            return;
        }
    }
    let dispensed = last.dispensed_total().unwrap_or_else(|| {
        warn!("💵️ The dispensed figures for the last transaction do not add up. Treating them as unavailable.");
        MinorUnits::ZERO
    });
    let update = CashDetails {
        inserted: last.inserted.unwrap_or_default(),
        dispensed,
        not_dispensed: last.not_dispensed_total(),
        ..Default::default()
    };
    details.merge(update);
}

pub fn message_for(state: SessionState, details: &CashDetails, requested: MinorUnits, currency: &str) -> String {
    match state {
        SessionState::InProgress if details.inserted.is_positive() => {
            format!("Inserted {} of {requested} {currency}", details.inserted)
        },
        SessionState::InProgress => format!("Insert {requested} {currency}"),
        SessionState::Paid => "Payment received. Handling change.".to_string(),
        SessionState::Approved => "Payment committed. Waiting for the machine to finish.".to_string(),
        SessionState::Finished if details.dispensed.is_positive() => {
            format!("Payment complete. Change dispensed: {} {currency}", details.dispensed)
        },
        SessionState::Finished => "Payment complete".to_string(),
        SessionState::FinishedManual => {
            format!("Payment complete. Hand over {} {currency} in change manually.", details.not_dispensed)
        },
        SessionState::Cancelled => "Payment cancelled".to_string(),
        SessionState::Declined | SessionState::Error => "Payment failed".to_string(),
    }
}
