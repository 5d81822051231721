use std::sync::{Arc, Mutex};

use cash_recycler_tools::{ActiveTransaction, CashRecyclerError, LastTransaction, StartPaymentResponse};
use mockall::{mock, Sequence};
use pos_common::MinorUnits;
use pos_payment_engine::cash_recycler::CashRecyclerApi;

mock! {
    pub CashRecycler {}
    impl CashRecyclerApi for CashRecycler {
        async fn start_payment(
            &self,
            amount: MinorUnits,
            reference: &str,
        ) -> Result<StartPaymentResponse, CashRecyclerError>;
        async fn active_transaction(&self) -> Result<ActiveTransaction, CashRecyclerError>;
        async fn last_transaction(&self) -> Result<LastTransaction, CashRecyclerError>;
        async fn finish_payment(&self, reference: &str) -> Result<(), CashRecyclerError>;
        async fn cancel_payment(&self, reference: &str) -> Result<(), CashRecyclerError>;
    }
}

/// What the engine asked of a mocked machine.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub started: Vec<(MinorUnits, String)>,
    pub polls: usize,
    pub last_transaction_queries: usize,
    pub finished: Vec<String>,
    pub cancelled: Vec<String>,
}

/// The test's side of a mocked machine: the calls it received, and the reading it reports once its script has run out.
#[derive(Clone, Default)]
pub struct MachineHandle {
    calls: Arc<Mutex<CallLog>>,
    reading: Arc<Mutex<ActiveTransaction>>,
}

impl MachineHandle {
    pub fn calls(&self) -> CallLog {
        self.calls.lock().unwrap().clone()
    }

    /// Changes what the machine reports from now on, e.g. the customer taking their change.
    pub fn report(&self, reading: ActiveTransaction) {
        *self.reading.lock().unwrap() = reading;
    }

    fn record<F: FnOnce(&mut CallLog)>(&self, f: F) {
        f(&mut self.calls.lock().unwrap())
    }

    fn current_reading(&self) -> ActiveTransaction {
        self.reading.lock().unwrap().clone()
    }
}

/// Builds a [`MockCashRecycler`] that reports `readings` in order and then keeps repeating the last one.
pub struct MachineScript {
    readings: Vec<ActiveTransaction>,
    last_transaction: LastTransaction,
    start_fails: bool,
}

impl MachineScript {
    pub fn new(readings: Vec<ActiveTransaction>) -> Self {
        Self { readings, last_transaction: LastTransaction::default(), start_fails: false }
    }

    pub fn with_last_transaction(mut self, last: LastTransaction) -> Self {
        self.last_transaction = last;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.start_fails = true;
        self
    }

    pub fn build(self) -> (MockCashRecycler, MachineHandle) {
        let handle = MachineHandle::default();
        handle.report(self.readings.last().cloned().unwrap_or_else(ActiveTransaction::idle));
        let mut machine = MockCashRecycler::new();

        let h = handle.clone();
        let start_fails = self.start_fails;
        machine.expect_start_payment().times(1).returning(move |amount, reference| {
            h.record(|c| c.started.push((amount, reference.to_string())));
            if start_fails {
                Err(CashRecyclerError::QueryError { status: 503, message: "Machine is out of service".into() })
            } else {
                Ok(StartPaymentResponse { transaction_id: Some("T-1".into()) })
            }
        });

        let mut seq = Sequence::new();
        for reading in self.readings {
            let h = handle.clone();
            machine.expect_active_transaction().times(1).in_sequence(&mut seq).returning(move || {
                h.record(|c| c.polls += 1);
                Ok(reading.clone())
            });
        }
        let h = handle.clone();
        machine.expect_active_transaction().returning(move || {
            h.record(|c| c.polls += 1);
            Ok(h.current_reading())
        });

        let h = handle.clone();
        let last = self.last_transaction;
        machine.expect_last_transaction().returning(move || {
            h.record(|c| c.last_transaction_queries += 1);
            Ok(last.clone())
        });

        let h = handle.clone();
        machine.expect_finish_payment().returning(move |reference| {
            h.record(|c| c.finished.push(reference.to_string()));
            Ok(())
        });
        let h = handle.clone();
        machine.expect_cancel_payment().returning(move |reference| {
            h.record(|c| c.cancelled.push(reference.to_string()));
            Ok(())
        });
        (machine, handle)
    }
}
