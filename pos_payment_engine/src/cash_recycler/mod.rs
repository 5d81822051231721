//! Cash recycler integration: the device seam, the polling heuristics and the per-session driver task.
mod driver;
mod state;

use std::future::Future;

use cash_recycler_tools::{
    ActiveTransaction,
    CashRecyclerClient,
    CashRecyclerError,
    LastTransaction,
    StartPaymentResponse,
};
pub use driver::{cancel_and_settle, commit_payment, CashSessionDriver};
use pos_common::MinorUnits;
pub use state::{
    apply_last_transaction,
    derive_state,
    message_for,
    needs_last_transaction,
    record_observation,
    timeout_state,
    Observation,
};

/// The calls a cash session makes against the machine.
///
/// [`CashRecyclerClient`] is the production implementation. The engine shares one instance between all cash sessions.
pub trait CashRecyclerApi: Send + Sync + 'static {
    fn start_payment(
        &self,
        amount: MinorUnits,
        reference: &str,
    ) -> impl Future<Output = Result<StartPaymentResponse, CashRecyclerError>> + Send;

    fn active_transaction(&self) -> impl Future<Output = Result<ActiveTransaction, CashRecyclerError>> + Send;

    fn last_transaction(&self) -> impl Future<Output = Result<LastTransaction, CashRecyclerError>> + Send;

    fn finish_payment(&self, reference: &str) -> impl Future<Output = Result<(), CashRecyclerError>> + Send;

    fn cancel_payment(&self, reference: &str) -> impl Future<Output = Result<(), CashRecyclerError>> + Send;
}

impl CashRecyclerApi for CashRecyclerClient {
    fn start_payment(
        &self,
        amount: MinorUnits,
        reference: &str,
    ) -> impl Future<Output = Result<StartPaymentResponse, CashRecyclerError>> + Send {
        CashRecyclerClient::start_payment(self, amount, reference)
    }

    fn active_transaction(&self) -> impl Future<Output = Result<ActiveTransaction, CashRecyclerError>> + Send {
        CashRecyclerClient::active_transaction(self)
    }

    fn last_transaction(&self) -> impl Future<Output = Result<LastTransaction, CashRecyclerError>> + Send {
        CashRecyclerClient::last_transaction(self)
    }

    fn finish_payment(&self, reference: &str) -> impl Future<Output = Result<(), CashRecyclerError>> + Send {
        CashRecyclerClient::finish_payment(self, reference)
    }

    fn cancel_payment(&self, reference: &str) -> impl Future<Output = Result<(), CashRecyclerError>> + Send {
        CashRecyclerClient::cancel_payment(self, reference)
    }
}
