//! Session data types shared by both payment devices.
//!
//! A [`Session`] has the same shape whichever device produced it. Protocol tasks never hold a `Session`; they describe
//! what they observed in a [`SessionPatch`] and the registry merges it, enforcing the state graph on the way.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use log::*;
use pos_common::MinorUnits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------------------   SessionId   ---------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh 128-bit random identifier, rendered as 32 hex characters.
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

//--------------------------------------------------   DeviceKind   --------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    CashRecycler,
    CardTerminal,
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CashRecycler => f.write_str("cash_recycler"),
            Self::CardTerminal => f.write_str("card_terminal"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown payment device: {0}. Use 'cash' or 'card'.")]
pub struct DeviceKindParseError(String);

impl FromStr for DeviceKind {
    type Err = DeviceKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" | "cash_recycler" | "cashrecycler" => Ok(Self::CashRecycler),
            "card" | "card_terminal" | "cardterminal" => Ok(Self::CardTerminal),
            _ => Err(DeviceKindParseError(s.to_string())),
        }
    }
}

//--------------------------------------------------   SessionState   ------------------------------------------------
/// The lifecycle state of a payment session.
///
/// | Device        | Intermediate                   | Terminal                                         |
/// |---------------|--------------------------------|--------------------------------------------------|
/// | Card terminal | `InProgress`                   | `Approved`, `Declined`, `Cancelled`, `Error`     |
/// | Cash recycler | `InProgress`, `Paid`, `Approved` | `Finished`, `FinishedManual`, `Cancelled`, `Error` |
///
/// For the cash recycler, `Paid` means all money was inserted and `Approved` means the POS has committed the payment.
/// `FinishedManual` flags change that the machine could not dispense and that must be handed over by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    InProgress,
    Paid,
    Approved,
    Declined,
    Cancelled,
    Error,
    Finished,
    FinishedManual,
}

impl SessionState {
    pub fn is_terminal_for(&self, device: DeviceKind) -> bool {
        use SessionState::*;
        match device {
            DeviceKind::CardTerminal => matches!(self, Approved | Declined | Cancelled | Error),
            DeviceKind::CashRecycler => matches!(self, Finished | FinishedManual | Cancelled | Error),
        }
    }

    /// True for the terminal states in which the money was collected.
    pub fn is_success_for(&self, device: DeviceKind) -> bool {
        use SessionState::*;
        match device {
            DeviceKind::CardTerminal => matches!(self, Approved),
            DeviceKind::CashRecycler => matches!(self, Finished | FinishedManual),
        }
    }

    /// States only ever move forward. Staying in the same state is always allowed.
    pub fn can_transition_to(&self, next: SessionState, device: DeviceKind) -> bool {
        use SessionState::*;
        if *self == next {
            return true;
        }
        match device {
            DeviceKind::CardTerminal => matches!((self, next), (InProgress, Approved | Declined | Cancelled | Error)),
            DeviceKind::CashRecycler => matches!(
                (self, next),
                (InProgress, Paid | Cancelled | Error | Finished | FinishedManual) |
                    (Paid, Approved | Finished | FinishedManual) |
                    (Approved, Finished | FinishedManual)
            ),
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Paid => "PAID",
            Self::Approved => "APPROVED",
            Self::Declined => "DECLINED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
            Self::Finished => "FINISHED",
            Self::FinishedManual => "FINISHED_MANUAL",
        };
        f.write_str(s)
    }
}

//--------------------------------------------------   Details   -----------------------------------------------------
/// What the card terminal reported about the transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardDetails {
    /// The per-process sync number the request was sent with. Abort requests must quote it.
    pub sync_number: Option<u64>,
    pub result_code: Option<i64>,
    pub auth_result: Option<String>,
    pub auth_response_code: Option<String>,
    pub masked_pan: Option<String>,
    pub application_id: Option<String>,
    pub application_label: Option<String>,
    pub approval_code: Option<String>,
    pub amount_authorized: Option<MinorUnits>,
    pub receipt: Option<String>,
    pub error: Option<String>,
}

impl CardDetails {
    /// Fields present in `other` replace ours; absent fields keep what we already know.
    pub fn merge(&mut self, other: CardDetails) {
        fn take<T>(dest: &mut Option<T>, src: Option<T>) {
            if src.is_some() {
                *dest = src;
            }
        }
        take(&mut self.sync_number, other.sync_number);
        take(&mut self.result_code, other.result_code);
        take(&mut self.auth_result, other.auth_result);
        take(&mut self.auth_response_code, other.auth_response_code);
        take(&mut self.masked_pan, other.masked_pan);
        take(&mut self.application_id, other.application_id);
        take(&mut self.application_label, other.application_label);
        take(&mut self.approval_code, other.approval_code);
        take(&mut self.amount_authorized, other.amount_authorized);
        take(&mut self.receipt, other.receipt);
        take(&mut self.error, other.error);
    }
}

/// Amounts collected from the cash recycler's polling endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CashDetails {
    /// Idempotency reference the payment was started with. Finish and cancel requests quote it.
    pub reference: Option<String>,
    pub inserted: MinorUnits,
    pub dispensed: MinorUnits,
    pub not_dispensed: MinorUnits,
    /// The machine reported a non-idle operation at least once.
    pub seen_active: bool,
    /// The last-transaction fallback has already been consulted.
    pub last_transaction_checked: bool,
}

impl CashDetails {
    /// Merges a newer reading into the cache.
    ///
    /// The machine stops reporting dispensed figures once it returns to idle, so a zero never overwrites a cached
    /// non-zero amount. Inserted money only grows during a transaction.
    pub fn merge(&mut self, other: CashDetails) {
        if other.reference.is_some() {
            self.reference = other.reference;
        }
        if other.inserted > self.inserted {
            self.inserted = other.inserted;
        }
        if !other.dispensed.is_zero() {
            self.dispensed = other.dispensed;
        }
        if !other.not_dispensed.is_zero() {
            self.not_dispensed = other.not_dispensed;
        }
        self.seen_active |= other.seen_active;
        self.last_transaction_checked |= other.last_transaction_checked;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum SessionDetails {
    Card(CardDetails),
    Cash(CashDetails),
}

impl SessionDetails {
    pub fn empty_for(device: DeviceKind) -> Self {
        match device {
            DeviceKind::CardTerminal => Self::Card(CardDetails::default()),
            DeviceKind::CashRecycler => Self::Cash(CashDetails::default()),
        }
    }
}

//--------------------------------------------------   Session   -----------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub device: DeviceKind,
    pub requested_amount: MinorUnits,
    pub state: SessionState,
    pub last_event: Option<String>,
    pub message: String,
    pub details: SessionDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

/// The result of merging a patch into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The patch was merged. `entered_terminal` is true if this patch moved the session into a terminal state.
    Applied { entered_terminal: bool },
    /// The session had already reached a terminal state, so nothing changed.
    Ignored,
}

impl Session {
    pub fn new(device: DeviceKind, requested_amount: MinorUnits, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::random(),
            device,
            requested_amount,
            state: SessionState::InProgress,
            last_event: None,
            message: "Payment started".to_string(),
            details: SessionDetails::empty_for(device),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal_for(self.device)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn card_details(&self) -> Option<&CardDetails> {
        match &self.details {
            SessionDetails::Card(d) => Some(d),
            SessionDetails::Cash(_) => None,
        }
    }

    pub fn cash_details(&self) -> Option<&CashDetails> {
        match &self.details {
            SessionDetails::Cash(d) => Some(d),
            SessionDetails::Card(_) => None,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        self.expires_at = now + ttl;
    }

    /// Merges `patch` into the session, keeping the state graph intact. Terminal sessions are never modified.
    pub fn apply(&mut self, patch: SessionPatch, now: DateTime<Utc>, ttl: Duration) -> PatchOutcome {
        if self.is_terminal() {
            trace!("🗂️ Session {} is already {}. Ignoring update.", self.id, self.state);
            return PatchOutcome::Ignored;
        }
        if let Some(next) = patch.state {
            if self.state.can_transition_to(next, self.device) {
                self.state = next;
            } else {
                debug!("🗂️ Session {} cannot move from {} to {next}. Keeping {}.", self.id, self.state, self.state);
            }
        }
        if patch.last_event.is_some() {
            self.last_event = patch.last_event;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        match (&mut self.details, patch.details) {
            (_, None) => {},
            (SessionDetails::Card(current), Some(SessionDetails::Card(update))) => current.merge(update),
            (SessionDetails::Cash(current), Some(SessionDetails::Cash(update))) => current.merge(update),
            (_, Some(_)) => warn!("🗂️ Session {} received details for the wrong device. Ignoring them.", self.id),
        }
        self.touch(now, ttl);
        PatchOutcome::Applied { entered_terminal: self.is_terminal() }
    }
}

//--------------------------------------------------   SessionPatch   ------------------------------------------------
/// A partial update to a session, produced by the protocol task that owns it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub state: Option<SessionState>,
    pub last_event: Option<String>,
    pub message: Option<String>,
    pub details: Option<SessionDetails>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_event<S: Into<String>>(mut self, event: S) -> Self {
        self.last_event = Some(event.into());
        self
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_card_details(mut self, details: CardDetails) -> Self {
        self.details = Some(SessionDetails::Card(details));
        self
    }

    pub fn with_cash_details(mut self, details: CashDetails) -> Self {
        self.details = Some(SessionDetails::Cash(details));
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL_STATES: [SessionState; 8] = [
        SessionState::InProgress,
        SessionState::Paid,
        SessionState::Approved,
        SessionState::Declined,
        SessionState::Cancelled,
        SessionState::Error,
        SessionState::Finished,
        SessionState::FinishedManual,
    ];

    fn ttl() -> Duration {
        Duration::seconds(600)
    }

    #[test]
    fn terminal_states_never_move() {
        for device in [DeviceKind::CardTerminal, DeviceKind::CashRecycler] {
            for from in ALL_STATES.iter().filter(|s| s.is_terminal_for(device)) {
                for to in ALL_STATES.iter().filter(|s| *s != from) {
                    assert!(!from.can_transition_to(*to, device), "{device}: {from} -> {to} must be rejected");
                }
            }
        }
    }

    #[test]
    fn nothing_returns_to_in_progress() {
        for device in [DeviceKind::CardTerminal, DeviceKind::CashRecycler] {
            for from in ALL_STATES.iter().filter(|s| **s != SessionState::InProgress) {
                assert!(!from.can_transition_to(SessionState::InProgress, device));
            }
        }
    }

    #[test]
    fn paid_is_only_promoted() {
        let device = DeviceKind::CashRecycler;
        assert!(SessionState::Paid.can_transition_to(SessionState::Finished, device));
        assert!(SessionState::Paid.can_transition_to(SessionState::FinishedManual, device));
        assert!(SessionState::Paid.can_transition_to(SessionState::Approved, device));
        assert!(!SessionState::Paid.can_transition_to(SessionState::Cancelled, device));
        assert!(!SessionState::Approved.can_transition_to(SessionState::Paid, device));
    }

    #[test]
    fn card_sessions_have_no_intermediate_states() {
        let device = DeviceKind::CardTerminal;
        assert!(!SessionState::InProgress.can_transition_to(SessionState::Paid, device));
        assert!(!SessionState::InProgress.can_transition_to(SessionState::Finished, device));
        assert!(SessionState::Approved.is_terminal_for(device));
        assert!(!SessionState::Approved.is_terminal_for(DeviceKind::CashRecycler));
    }

    #[test]
    fn apply_ignores_terminal_sessions() {
        let mut session = Session::new(DeviceKind::CardTerminal, 1050.into(), ttl());
        let outcome = session.apply(SessionPatch::new().with_state(SessionState::Declined), Utc::now(), ttl());
        assert_eq!(outcome, PatchOutcome::Applied { entered_terminal: true });
        let outcome = session.apply(
            SessionPatch::new().with_state(SessionState::Approved).with_message("late"),
            Utc::now(),
            ttl(),
        );
        assert_eq!(outcome, PatchOutcome::Ignored);
        assert_eq!(session.state, SessionState::Declined);
        assert_ne!(session.message, "late");
    }

    #[test]
    fn illegal_transition_keeps_state_but_merges_fields() {
        let mut session = Session::new(DeviceKind::CashRecycler, 500.into(), ttl());
        session.apply(SessionPatch::new().with_state(SessionState::Paid), Utc::now(), ttl());
        let outcome = session.apply(
            SessionPatch::new().with_state(SessionState::Cancelled).with_event("operation:IDLE"),
            Utc::now(),
            ttl(),
        );
        assert_eq!(outcome, PatchOutcome::Applied { entered_terminal: false });
        assert_eq!(session.state, SessionState::Paid);
        assert_eq!(session.last_event.as_deref(), Some("operation:IDLE"));
    }

    #[test]
    fn cash_amounts_are_cached_monotonically() {
        let mut details = CashDetails::default();
        details.merge(CashDetails { inserted: 500.into(), dispensed: 50.into(), ..Default::default() });
        let idle = CashDetails { inserted: 0.into(), dispensed: 0.into(), ..Default::default() };
        details.merge(idle);
        assert_eq!(details.inserted, MinorUnits::from(500));
        assert_eq!(details.dispensed, MinorUnits::from(50));
        details.merge(CashDetails { not_dispensed: 20.into(), ..Default::default() });
        details.merge(CashDetails::default());
        assert_eq!(details.not_dispensed, MinorUnits::from(20));
    }

    #[test]
    fn mismatched_details_are_ignored() {
        let mut session = Session::new(DeviceKind::CardTerminal, 100.into(), ttl());
        session.apply(SessionPatch::new().with_cash_details(CashDetails::default()), Utc::now(), ttl());
        assert!(session.card_details().is_some());
    }

    #[test]
    fn device_kind_from_str() {
        assert_eq!("card".parse::<DeviceKind>().unwrap(), DeviceKind::CardTerminal);
        assert_eq!("CASH".parse::<DeviceKind>().unwrap(), DeviceKind::CashRecycler);
        assert!("cheque".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn session_ids_are_unique_hex() {
        let a = SessionId::random();
        let b = SessionId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_json() {
        let mut session = Session::new(DeviceKind::CashRecycler, MinorUnits::from(500), ttl());
        session.state = SessionState::FinishedManual;
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["id"], session.id.as_str());
        assert_eq!(json["device"], "cash_recycler");
        assert_eq!(json["state"], "FINISHED_MANUAL");
        assert_eq!(json["details"]["device"], "cash");
        assert_eq!(json["cancel_requested"], false);
    }
}
