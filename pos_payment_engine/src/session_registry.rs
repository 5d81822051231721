//! In-memory store of payment sessions.
//!
//! The registry is the single owner of every [`Session`]. The façade reads snapshots out of it and the protocol tasks
//! write [`SessionPatch`]es into it through a [`SessionUpdater`]. All mutation happens under one write lock, so a
//! patch is applied atomically and the state graph can be enforced in one place.
//!
//! There is no background timer. Expired sessions are evicted whenever [`SessionRegistry::sweep`] is called, which the
//! façade does on every call.
use std::{collections::HashMap, sync::Arc};

use chrono::{Duration, Utc};
use log::*;
use pos_common::MinorUnits;
use tokio::sync::{mpsc, RwLock};

use crate::{
    card_terminal::CardCommand,
    config::SessionConfig,
    events::{EventProducers, EventType},
    session_types::{DeviceKind, PatchOutcome, Session, SessionId, SessionPatch, SessionState},
};

/// A live handle into the task that drives a session.
#[derive(Debug, Clone)]
pub enum SessionControl {
    Card(mpsc::Sender<CardCommand>),
}

struct SessionEntry {
    session: Session,
    control: Option<SessionControl>,
}

/// The result of a successful [`SessionRegistry::update`].
#[derive(Debug, Clone)]
pub struct PatchResult {
    pub session: Session,
    /// True if this very patch moved the session into a terminal state.
    pub entered_terminal: bool,
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    ttl: Duration,
    finalized_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: config.ttl(),
            finalized_ttl: config.finalized_ttl(),
        }
    }

    pub async fn create(&self, device: DeviceKind, amount: MinorUnits) -> Session {
        let session = Session::new(device, amount, self.ttl);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), SessionEntry { session: session.clone(), control: None });
        debug!("🗂️ Created {device} session {} for {amount}. {} sessions are live.", session.id, sessions.len());
        session
    }

    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).map(|e| e.session.clone())
    }

    /// Merges `patch` into the session. Returns `None` if the session does not exist (any more).
    pub async fn update(&self, id: &SessionId, patch: SessionPatch) -> Option<PatchResult> {
        self.update_with(id, |_| patch).await
    }

    /// Like [`Self::update`], but the patch is built from the session as it stands under the write lock, so it cannot
    /// be based on a stale snapshot.
    pub async fn update_with<F>(&self, id: &SessionId, build: F) -> Option<PatchResult>
    where F: FnOnce(&Session) -> SessionPatch {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        let previous = entry.session.state;
        let patch = build(&entry.session);
        let now = Utc::now();
        let entered_terminal = match entry.session.apply(patch, now, self.ttl) {
            PatchOutcome::Applied { entered_terminal } => entered_terminal,
            PatchOutcome::Ignored => false,
        };
        if entered_terminal {
            entry.control = None;
            let settled = entry.session.cancel_requested || previous == SessionState::Approved;
            if entry.session.device == DeviceKind::CashRecycler && settled {
                entry.session.touch(now, self.finalized_ttl);
                trace!("🗂️ Session {id} was settled by the POS. It expires at {}", entry.session.expires_at);
            }
            debug!("🗂️ Session {id} moved from {previous} to {}", entry.session.state);
        }
        Some(PatchResult { session: entry.session.clone(), entered_terminal })
    }

    /// Flags the session for cancellation and returns the updated snapshot. The flag is never cleared.
    pub async fn request_cancel(&self, id: &SessionId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        if !entry.session.is_terminal() && !entry.session.cancel_requested {
            entry.session.cancel_requested = true;
            entry.session.touch(Utc::now(), self.ttl);
            debug!("🗂️ Cancellation requested for session {id}");
        }
        Some(entry.session.clone())
    }

    /// Stores the handle for the task driving the session. Terminal sessions no longer accept handles.
    pub async fn attach_control(&self, id: &SessionId, control: SessionControl) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(entry) if !entry.session.is_terminal() => {
                entry.control = Some(control);
                true
            },
            _ => false,
        }
    }

    pub async fn control(&self, id: &SessionId) -> Option<SessionControl> {
        self.sessions.read().await.get(id).and_then(|e| e.control.clone())
    }

    /// Removes every expired session and returns how many were evicted.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = !entry.session.is_expired(now);
            if !keep {
                info!("🗂️ Evicting expired session {id} ({})", entry.session.state);
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn updater(&self, id: SessionId, producers: EventProducers) -> SessionUpdater {
        SessionUpdater { registry: self.clone(), id, producers }
    }
}

//--------------------------------------------   SessionUpdater   ----------------------------------------------------
/// The write side of one session, handed to the task that drives it.
///
/// The updater publishes the payment completed / aborted event on the patch that moves the session into a terminal
/// state. Since terminal sessions ignore every later patch, each session announces its outcome exactly once.
#[derive(Clone)]
pub struct SessionUpdater {
    registry: SessionRegistry,
    id: SessionId,
    producers: EventProducers,
}

impl SessionUpdater {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Applies `patch` and returns the new snapshot, or `None` if the session has been evicted.
    pub async fn apply(&self, patch: SessionPatch) -> Option<Session> {
        self.apply_with(|_| patch).await
    }

    /// Applies the patch that `build` derives from the current session.
    pub async fn apply_with<F>(&self, build: F) -> Option<Session>
    where F: FnOnce(&Session) -> SessionPatch {
        let result = self.registry.update_with(&self.id, build).await;
        if result.is_none() {
            debug!("🗂️ Session {} is gone. Dropping update.", self.id);
        }
        let PatchResult { session, entered_terminal } = result?;
        if entered_terminal {
            self.producers.publish(EventType::for_terminal_session(session.clone())).await;
        }
        Some(session)
    }

    pub async fn snapshot(&self) -> Option<Session> {
        self.registry.get(&self.id).await
    }

    pub async fn cancel_requested(&self) -> bool {
        self.snapshot().await.map(|s| s.cancel_requested).unwrap_or(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn registry_with_ttl(ttl_secs: i64, finalized_ttl_secs: i64) -> SessionRegistry {
        SessionRegistry::new(&SessionConfig { ttl_secs, finalized_ttl_secs })
    }

    #[tokio::test]
    async fn create_and_get() {
        let registry = SessionRegistry::default();
        let session = registry.create(DeviceKind::CardTerminal, 1050.into()).await;
        let fetched = registry.get(&session.id).await.unwrap();
        assert_eq!(fetched, session);
        assert_eq!(fetched.state, SessionState::InProgress);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(&SessionId::from("unknown")).await.is_none());
    }

    #[tokio::test]
    async fn update_reports_terminal_entry_once() {
        let registry = SessionRegistry::default();
        let id = registry.create(DeviceKind::CardTerminal, 100.into()).await.id;
        let result = registry.update(&id, SessionPatch::new().with_state(SessionState::Approved)).await.unwrap();
        assert!(result.entered_terminal);
        let result = registry.update(&id, SessionPatch::new().with_state(SessionState::Declined)).await.unwrap();
        assert!(!result.entered_terminal);
        assert_eq!(result.session.state, SessionState::Approved);
        assert!(registry.update(&SessionId::from("nope"), SessionPatch::new()).await.is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_expired_sessions() {
        let registry = registry_with_ttl(-1, -1);
        registry.create(DeviceKind::CashRecycler, 100.into()).await;
        registry.create(DeviceKind::CardTerminal, 100.into()).await;
        assert_eq!(registry.sweep().await, 2);
        assert!(registry.is_empty().await);

        let registry = SessionRegistry::default();
        registry.create(DeviceKind::CashRecycler, 100.into()).await;
        assert_eq!(registry.sweep().await, 0);
    }

    #[tokio::test]
    async fn settled_cash_sessions_expire_sooner() {
        let registry = registry_with_ttl(600, 60);
        let id = registry.create(DeviceKind::CashRecycler, 500.into()).await.id;
        registry.update(&id, SessionPatch::new().with_state(SessionState::Paid)).await;
        registry.update(&id, SessionPatch::new().with_state(SessionState::Approved)).await;
        let result = registry.update(&id, SessionPatch::new().with_state(SessionState::Finished)).await.unwrap();
        let lifetime = result.session.expires_at - result.session.updated_at;
        assert_eq!(lifetime, Duration::seconds(60));

        let id = registry.create(DeviceKind::CashRecycler, 500.into()).await.id;
        registry.update(&id, SessionPatch::new().with_state(SessionState::Paid)).await;
        let result = registry.update(&id, SessionPatch::new().with_state(SessionState::Finished)).await.unwrap();
        let lifetime = result.session.expires_at - result.session.updated_at;
        assert_eq!(lifetime, Duration::seconds(600));
    }

    #[tokio::test]
    async fn patches_can_be_built_from_the_current_state() {
        let registry = SessionRegistry::default();
        let id = registry.create(DeviceKind::CashRecycler, 500.into()).await.id;
        registry.update(&id, SessionPatch::new().with_state(SessionState::Paid)).await;
        let updater = registry.updater(id.clone(), EventProducers::default());
        updater.apply(SessionPatch::new().with_state(SessionState::Approved).with_message("committed")).await;
        let session = updater
            .apply_with(|current| {
                assert_eq!(current.state, SessionState::Approved);
                SessionPatch::new().with_message(format!("still {}", current.state))
            })
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Approved);
        assert_eq!(session.message, "still APPROVED");
    }

    #[tokio::test]
    async fn cancel_flag_sticks() {
        let registry = SessionRegistry::default();
        let id = registry.create(DeviceKind::CashRecycler, 500.into()).await.id;
        assert!(registry.request_cancel(&id).await.unwrap().cancel_requested);
        registry.update(&id, SessionPatch::new().with_message("still going")).await;
        assert!(registry.get(&id).await.unwrap().cancel_requested);
    }

    #[tokio::test]
    async fn control_is_dropped_on_terminal_state() {
        let registry = SessionRegistry::default();
        let id = registry.create(DeviceKind::CardTerminal, 500.into()).await.id;
        let (tx, _rx) = mpsc::channel(1);
        assert!(registry.attach_control(&id, SessionControl::Card(tx.clone())).await);
        assert!(registry.control(&id).await.is_some());
        registry.update(&id, SessionPatch::new().with_state(SessionState::Error)).await;
        assert!(registry.control(&id).await.is_none());
        assert!(!registry.attach_control(&id, SessionControl::Card(tx)).await);
    }
}
