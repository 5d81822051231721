use std::{fmt::Debug, sync::Arc};

use cash_recycler_tools::{CashRecyclerClient, CashRecyclerConfig};
use log::*;
use pos_common::MinorUnits;

use crate::{
    card_terminal::CardTerminalClient,
    cash_recycler::{cancel_and_settle, commit_payment, CashRecyclerApi, CashSessionDriver},
    config::EngineConfig,
    events::EventProducers,
    ppe_api::errors::SessionApiError,
    session_registry::{SessionControl, SessionRegistry},
    session_types::{DeviceKind, Session, SessionId, SessionPatch, SessionState},
};

/// `PaymentSessionApi` is the entry point for the POS. It starts payment sessions on either device and hands out
/// snapshots of their progress.
///
/// None of its methods wait on a payment device. Device I/O happens in one background task per session, and every
/// call returns as soon as the registry has been consulted or updated.
pub struct PaymentSessionApi<B> {
    registry: SessionRegistry,
    card: CardTerminalClient,
    cash: Arc<B>,
    cash_config: CashRecyclerConfig,
    producers: EventProducers,
}

impl<B> Debug for PaymentSessionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentSessionApi")
    }
}

impl PaymentSessionApi<CashRecyclerClient> {
    /// Builds the engine against the real devices described in `config`.
    pub fn from_config(config: &EngineConfig, producers: EventProducers) -> Result<Self, SessionApiError> {
        let cash = CashRecyclerClient::new(config.cash_recycler.clone())
            .map_err(|e| SessionApiError::Initialization(e.to_string()))?;
        let registry = SessionRegistry::new(&config.sessions);
        let card = CardTerminalClient::new(config.card_terminal.clone());
        Ok(Self::new(registry, card, cash, config.cash_recycler.clone(), producers))
    }
}

impl<B> PaymentSessionApi<B>
where B: CashRecyclerApi
{
    pub fn new(
        registry: SessionRegistry,
        card: CardTerminalClient,
        cash: B,
        cash_config: CashRecyclerConfig,
        producers: EventProducers,
    ) -> Self {
        Self { registry, card, cash: Arc::new(cash), cash_config, producers }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Opens a payment session for `amount` on `device` and starts the device interaction in the background.
    pub async fn start(&self, device: DeviceKind, amount: MinorUnits) -> Result<SessionId, SessionApiError> {
        self.registry.sweep().await;
        if !amount.is_payable() {
            return Err(SessionApiError::InvalidAmount(amount.value().to_string()));
        }
        let session = self.registry.create(device, amount).await;
        let id = session.id.clone();
        let updater = self.registry.updater(id.clone(), self.producers.clone());
        match device {
            DeviceKind::CardTerminal => {
                let sender = self.card.spawn_transaction(updater, amount);
                if !self.registry.attach_control(&id, SessionControl::Card(sender)).await {
                    trace!("🧾️ Card session {id} finished before its control handle was stored");
                }
            },
            DeviceKind::CashRecycler => {
                CashSessionDriver::new(Arc::clone(&self.cash), self.cash_config.clone(), updater, amount).spawn();
            },
        }
        info!("🧾️ Started {device} session {id} for {amount}");
        Ok(id)
    }

    /// A snapshot of the session.
    pub async fn status(&self, id: &SessionId) -> Result<Session, SessionApiError> {
        self.registry.sweep().await;
        self.registry.get(id).await.ok_or_else(|| SessionApiError::SessionNotFound(id.clone()))
    }

    /// Asks the device to abandon the payment. The outcome is reported through [`Self::status`]; a session that has
    /// already ended is left alone.
    pub async fn cancel(&self, id: &SessionId) -> Result<(), SessionApiError> {
        let current = self.status(id).await?;
        if current.is_terminal() {
            debug!("🧾️ Session {id} is already {}. Nothing to cancel.", current.state);
            return Ok(());
        }
        let session =
            self.registry.request_cancel(id).await.ok_or_else(|| SessionApiError::SessionNotFound(id.clone()))?;
        info!("🧾️ Cancelling session {id}");
        match session.device {
            DeviceKind::CardTerminal => {
                let control = self.registry.control(id).await;
                self.card.abort(&session, control);
            },
            DeviceKind::CashRecycler => match session.cash_details().and_then(|d| d.reference.clone()) {
                Some(reference) => {
                    tokio::spawn(cancel_and_settle(Arc::clone(&self.cash), reference));
                },
                None => debug!("🧾️ Session {id} has not reached the machine yet. It will stop before starting."),
            },
        }
        Ok(())
    }

    /// Commits a paid cash session. The machine finalises it and the session ends as finished.
    pub async fn finish(&self, id: &SessionId) -> Result<(), SessionApiError> {
        let session = self.status(id).await?;
        if session.device != DeviceKind::CashRecycler {
            return Err(SessionApiError::UnsupportedOperation { device: session.device, operation: "finish" });
        }
        match session.state {
            _ if session.is_terminal() => {
                debug!("🧾️ Session {id} is already {}. Nothing to finish.", session.state);
                Ok(())
            },
            SessionState::Approved => Ok(()),
            SessionState::Paid => {
                let patch = SessionPatch::new()
                    .with_state(SessionState::Approved)
                    .with_event("finish_requested")
                    .with_message("Payment committed. Waiting for the machine to finish.");
                self.registry.updater(id.clone(), self.producers.clone()).apply(patch).await;
                match session.cash_details().and_then(|d| d.reference.clone()) {
                    Some(reference) => {
                        tokio::spawn(commit_payment(Arc::clone(&self.cash), reference));
                    },
                    None => warn!("🧾️ Session {id} has no payment reference. The commit cannot be sent."),
                }
                info!("🧾️ Session {id} committed");
                Ok(())
            },
            state => Err(SessionApiError::InvalidState { id: id.clone(), state }),
        }
    }
}
