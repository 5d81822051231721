use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use cash_recycler_tools::ActiveTransaction;
use futures_util::FutureExt;
use log::*;
use pos_common::MinorUnits;
use pos_payment_engine::{
    events::{EventHandlers, EventHooks},
    test_utils::{financial_result_xml, FakeCardTerminal, TerminalStep},
    DeviceKind,
    SessionState,
};
use support::{cash_config, engine, eventually, wait_for_terminal, MachineScript};

mod support;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
    states: Arc<Mutex<Vec<SessionState>>>,
}

impl HookCalled {
    pub fn called(&self, state: SessionState) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
        self.states.lock().unwrap().push(state);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn each_session_reports_its_outcome_once() {
    let completed = HookCalled::default();
    let aborted = HookCalled::default();
    let mut hooks = EventHooks::default();
    let completed_copy = completed.clone();
    hooks.on_payment_completed(move |ev| {
        info!("🪝️ Payment completed: {}", ev.session.id);
        completed_copy.called(ev.session.state);
        async {}.boxed()
    });
    let aborted_copy = aborted.clone();
    hooks.on_payment_aborted(move |ev| {
        info!("🪝️ Payment aborted: {} ({})", ev.session.id, ev.state);
        aborted_copy.called(ev.state);
        async {}.boxed()
    });
    let handlers = EventHandlers::new(8, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let terminal = FakeCardTerminal::start(vec![TerminalStep::Send(financial_result_xml(0, 1050))]).await;
    let readings = vec![ActiveTransaction::running(500, 500), ActiveTransaction::idle()];
    let (machine, _) = MachineScript::new(readings).build();
    let (failing, _) = MachineScript::new(vec![]).failing_start().build();

    let api = engine(terminal.config(), machine, cash_config(), producers.clone());
    let card = api.start(DeviceKind::CardTerminal, MinorUnits::from(1050)).await.unwrap();
    let cash = api.start(DeviceKind::CashRecycler, MinorUnits::from(500)).await.unwrap();
    assert_eq!(wait_for_terminal(&api, &card).await.state, SessionState::Approved);
    assert_eq!(wait_for_terminal(&api, &cash).await.state, SessionState::Finished);

    let failing_api = engine(terminal.config(), failing, cash_config(), producers);
    let broken = failing_api.start(DeviceKind::CashRecycler, MinorUnits::from(500)).await.unwrap();
    assert_eq!(wait_for_terminal(&failing_api, &broken).await.state, SessionState::Error);

    eventually(Duration::from_secs(2), || async { completed.count() == 2 && aborted.count() == 1 }).await;
    // Late updates never re-announce a finished session
    api.cancel(&card).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(completed.count(), 2);
    assert_eq!(aborted.count(), 1);
    let mut states = completed.states();
    states.sort_by_key(|s| s.to_string());
    assert_eq!(states, vec![SessionState::Approved, SessionState::Finished]);
    assert_eq!(aborted.states(), vec![SessionState::Error]);
}
