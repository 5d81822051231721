use std::time::Duration;

use anyhow::{anyhow, Context};
use log::*;
use pos_common::MinorUnits;
use pos_payment_engine::{
    events::{EventHandlers, EventHooks},
    DeviceKind,
    EngineConfig,
    PaymentSessionApi,
    Session,
    SessionState,
};

use crate::command_def::PayParams;

const MIN_POLL_MS: u64 = 50;

pub fn print_config(config: &EngineConfig) {
    let card = &config.card_terminal;
    let cash = &config.cash_recycler;
    println!("----------------------------- Card terminal ----------------------------");
    println!("Address:          {}", card.address());
    println!("POS id:           {}", card.pos_id);
    println!("Currency code:    {}", card.currency_code);
    println!("Partial approval: {}", card.partial_approval);
    println!("Connect timeout:  {:?}", card.connect_timeout());
    println!("Payment timeout:  {:?}", card.transaction_timeout());
    println!("Abort timeout:    {:?}", card.abort_timeout());
    println!("----------------------------- Cash recycler ----------------------------");
    println!("Url:              {}", cash.base_url);
    println!("User:             {} (password {})", cash.username, cash.password);
    println!("Currency:         {}", cash.currency);
    println!("Poll interval:    {:?}", cash.poll_interval());
    println!("Payment timeout:  {:?}", cash.payment_timeout());
    println!("------------------------------- Sessions -------------------------------");
    println!("TTL:              {}s", config.sessions.ttl_secs);
    println!("Settled TTL:      {}s", config.sessions.finalized_ttl_secs);
    println!("------------------------------------------------------------------------");
}

pub async fn run_payment(config: EngineConfig, params: PayParams) -> anyhow::Result<()> {
    let amount = MinorUnits::from(params.amount);
    let mut hooks = EventHooks::default();
    hooks.on_payment_completed(|ev| {
        Box::pin(async move {
            info!("🧾️ Payment {} completed for {}", ev.session.id, ev.session.requested_amount);
        })
    });
    hooks.on_payment_aborted(|ev| {
        Box::pin(async move {
            info!("🧾️ Payment {} ended without payment: {}", ev.session.id, ev.state);
        })
    });
    let handlers = EventHandlers::new(16, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let api = PaymentSessionApi::from_config(&config, producers).context("Could not start the payment engine")?;
    let id = api.start(params.device, amount).await?;
    println!("Started {} payment {id} for {amount}", params.device);

    let mut ticker = tokio::time::interval(Duration::from_millis(params.poll_ms.max(MIN_POLL_MS)));
    let mut last_seen = None;
    let mut finish_sent = false;
    let session = loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling...");
                api.cancel(&id).await?;
                continue;
            },
        }
        let session = api.status(&id).await?;
        let seen = (session.state, session.message.clone());
        if last_seen.as_ref() != Some(&seen) {
            println!("[{}] {}", session.state, session.message);
            last_seen = Some(seen);
        }
        if session.is_terminal() {
            break session;
        }
        let paid = session.device == DeviceKind::CashRecycler && session.state == SessionState::Paid;
        if params.auto_finish && paid && !finish_sent {
            api.finish(&id).await?;
            finish_sent = true;
        }
    };
    print_outcome(&session, params.json)?;
    if session.state.is_success_for(session.device) {
        Ok(())
    } else {
        Err(anyhow!("Payment {} ended in {}", session.id, session.state))
    }
}

fn print_outcome(session: &Session, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
        return Ok(());
    }
    println!("------------------------------- Outcome --------------------------------");
    println!("Session:   {}", session.id);
    println!("State:     {}", session.state);
    println!("Requested: {}", session.requested_amount);
    if let Some(card) = session.card_details() {
        println!("Card:      {}", card.masked_pan.as_deref().unwrap_or("-"));
        println!("Approval:  {}", card.approval_code.as_deref().unwrap_or("-"));
        if let Some(receipt) = &card.receipt {
            println!("Receipt:\n{receipt}");
        }
    }
    if let Some(cash) = session.cash_details() {
        println!("Inserted:  {}", cash.inserted);
        println!("Change:    {}", cash.dispensed);
        if cash.not_dispensed.is_positive() {
            println!("Hand over manually: {}", cash.not_dispensed);
        }
    }
    println!("------------------------------------------------------------------------");
    Ok(())
}
