#![allow(dead_code)]
use std::{future::Future, time::Duration};

use cash_recycler_tools::CashRecyclerConfig;
use pos_payment_engine::{
    card_terminal::CardTerminalClient,
    cash_recycler::CashRecyclerApi,
    events::EventProducers,
    test_utils::prepare_env::prepare_test_env,
    CardTerminalConfig,
    PaymentSessionApi,
    Session,
    SessionId,
    SessionRegistry,
};
use tokio::time::{sleep, Instant};

mod mocks;

pub use mocks::{CallLog, MachineHandle, MachineScript, MockCashRecycler};

pub fn cash_config() -> CashRecyclerConfig {
    CashRecyclerConfig { poll_interval_ms: 10, ..Default::default() }
}

pub fn engine<B: CashRecyclerApi>(
    card: CardTerminalConfig,
    cash: B,
    cash_config: CashRecyclerConfig,
    producers: EventProducers,
) -> PaymentSessionApi<B> {
    prepare_test_env();
    PaymentSessionApi::new(SessionRegistry::default(), CardTerminalClient::new(card), cash, cash_config, producers)
}

/// Polls the session until `predicate` holds. Panics after `limit`.
pub async fn wait_for<B, F>(api: &PaymentSessionApi<B>, id: &SessionId, limit: Duration, predicate: F) -> Session
where
    B: CashRecyclerApi,
    F: Fn(&Session) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let session = api.status(id).await.expect("Session disappeared");
        if predicate(&session) {
            return session;
        }
        if Instant::now() > deadline {
            panic!("Timed out waiting for session {id}. Last seen: {session:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_terminal<B: CashRecyclerApi>(api: &PaymentSessionApi<B>, id: &SessionId) -> Session {
    wait_for(api, id, Duration::from_secs(5), |s| s.is_terminal()).await
}

/// Waits until `check` returns true. Panics after `limit`.
pub async fn eventually<F, Fut>(limit: Duration, check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while !check().await {
        if Instant::now() > deadline {
            panic!("Condition not met within {limit:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
