use std::sync::Arc;

use cash_recycler_tools::{helpers::new_payment_reference, CashRecyclerConfig};
use log::*;
use pos_common::MinorUnits;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::{
    cash_recycler::{
        apply_last_transaction,
        derive_state,
        message_for,
        needs_last_transaction,
        record_observation,
        timeout_state,
        CashRecyclerApi,
    },
    session_registry::SessionUpdater,
    session_types::{CashDetails, Session, SessionPatch, SessionState},
};

/// Polls the machine on behalf of one cash session until the session reaches a terminal state.
pub struct CashSessionDriver<B> {
    api: Arc<B>,
    config: CashRecyclerConfig,
    updater: SessionUpdater,
    requested: MinorUnits,
}

impl<B> CashSessionDriver<B>
where B: CashRecyclerApi
{
    pub fn new(api: Arc<B>, config: CashRecyclerConfig, updater: SessionUpdater, requested: MinorUnits) -> Self {
        Self { api, config, updater, requested }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            self.run().await;
        });
    }

    pub async fn run(self) {
        let started = Instant::now();
        let id = self.updater.id().clone();
        let reference = new_payment_reference();
        let details = CashDetails { reference: Some(reference.clone()), ..Default::default() };
        self.updater.apply(SessionPatch::new().with_event("starting").with_cash_details(details)).await;
        if self.updater.cancel_requested().await {
            let patch = SessionPatch::new()
                .with_state(SessionState::Cancelled)
                .with_event("cancelled")
                .with_message("Payment cancelled before it reached the machine");
            self.updater.apply(patch).await;
            return;
        }
        match self.api.start_payment(self.requested, &reference).await {
            Ok(response) => {
                let tx = response.transaction_id.as_deref().unwrap_or("n/a");
                info!("💵️ Cash payment {reference} for session {id} accepted by the machine. Transaction id: {tx}");
                let currency = &self.config.currency;
                let message = message_for(SessionState::InProgress, &CashDetails::default(), self.requested, currency);
                self.updater.apply(SessionPatch::new().with_event("started").with_message(message)).await;
                // A cancel that arrived while the start request was in flight may have reached the machine first
                if self.updater.cancel_requested().await {
                    cancel_and_settle(Arc::clone(&self.api), reference.clone()).await;
                }
            },
            Err(e) => {
                error!("💵️ Could not start cash payment {reference} for session {id}. {e}");
                let patch = SessionPatch::new()
                    .with_state(SessionState::Error)
                    .with_event("start_failed")
                    .with_message(format!("Could not start the cash payment. {e}"));
                self.updater.apply(patch).await;
                return;
            },
        }

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(session) = self.updater.snapshot().await else {
                debug!("💵️ Session {id} was evicted. Stopping the poller.");
                return;
            };
            if session.is_terminal() {
                return;
            }
            if started.elapsed() >= self.config.payment_timeout() {
                self.time_out(&session).await;
                return;
            }
            let grace_elapsed = started.elapsed() >= self.config.start_grace();
            if self.poll(&session, grace_elapsed).await {
                return;
            }
        }
    }

    /// Takes one reading and applies it. Returns true once the session is terminal.
    async fn poll(&self, session: &Session, grace_elapsed: bool) -> bool {
        let reading = match self.api.active_transaction().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("💵️ Polling the cash recycler for session {} failed. {e} Retrying.", session.id);
                return false;
            },
        };
        trace!("💵️ Session {} reading: {reading:?}", session.id);
        let observation = record_observation(&reading);
        let mut details = session.cash_details().cloned().unwrap_or_default();
        details.merge(observation.details.clone());
        let mut patch = SessionPatch::new().with_event(observation.event_tag());

        if needs_last_transaction(session.state, observation.idle, &details, self.requested) {
            match self.api.last_transaction().await {
                Ok(last) => {
                    debug!("💵️ Session {} recovered change figures from the last transaction: {last:?}", session.id);
                    apply_last_transaction(&mut details, &last);
                },
                Err(e) => {
                    warn!("💵️ Could not fetch the last transaction for session {}. {e} Retrying.", session.id);
                    self.updater.apply(patch.with_cash_details(details)).await;
                    return false;
                },
            }
        }

        // The POS may have committed or cancelled the session since the snapshot was taken
        let idle = observation.idle;
        let updated = self
            .updater
            .apply_with(|current| {
                let mut merged = current.cash_details().cloned().unwrap_or_default();
                merged.merge(details);
                let cancelled = current.cancel_requested;
                let next = derive_state(current.state, idle, &merged, self.requested, grace_elapsed, cancelled);
                let message = message_for(next, &merged, self.requested, &self.config.currency);
                patch.with_state(next).with_message(message).with_cash_details(merged)
            })
            .await;
        match updated {
            Some(s) if s.is_terminal() => {
                info!("💵️ Cash session {} ended in {}. {}", s.id, s.state, s.message);
                true
            },
            Some(_) => false,
            None => true,
        }
    }

    async fn time_out(&self, session: &Session) {
        let details = session.cash_details().cloned().unwrap_or_default();
        let state = timeout_state(&details);
        warn!("💵️ Cash session {} timed out with {} inserted. Closing it as {state}.", session.id, details.inserted);
        if details.inserted.is_zero() {
            if let Some(reference) = details.reference.as_deref() {
                if let Err(e) = self.api.cancel_payment(reference).await {
                    warn!("💵️ Could not cancel payment {reference} on the machine. {e}");
                }
            }
        }
        let message = format!(
            "Cash payment timed out. {}",
            message_for(state, &details, self.requested, &self.config.currency)
        );
        self.updater.apply(SessionPatch::new().with_state(state).with_event("timeout").with_message(message)).await;
    }
}

/// Commits a paid session on the machine. Failures are logged; polling still decides the final state.
pub async fn commit_payment<B: CashRecyclerApi>(api: Arc<B>, reference: String) {
    match api.finish_payment(&reference).await {
        Ok(()) => debug!("💵️ Payment {reference} committed"),
        Err(e) => warn!("💵️ Could not commit payment {reference}. {e}"),
    }
}

/// Cancels a session on the machine and settles it, so the machine returns any inserted money and goes idle.
pub async fn cancel_and_settle<B: CashRecyclerApi>(api: Arc<B>, reference: String) {
    match api.cancel_payment(&reference).await {
        Ok(()) => debug!("💵️ Payment {reference} cancelled"),
        Err(e) => warn!("💵️ Could not cancel payment {reference}. {e}"),
    }
    match api.finish_payment(&reference).await {
        Ok(()) => debug!("💵️ Payment {reference} settled"),
        Err(e) => warn!("💵️ Could not settle payment {reference}. {e}"),
    }
}
