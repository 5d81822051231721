use std::{future::Future, pin::Pin, sync::Arc};

use log::*;

use crate::events::{EventHandler, EventProducer, EventType, Handler, PaymentAbortedEvent, PaymentCompletedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_completed_producer: Vec<EventProducer<PaymentCompletedEvent>>,
    pub payment_aborted_producer: Vec<EventProducer<PaymentAbortedEvent>>,
}

impl EventProducers {
    pub async fn publish(&self, event: EventType) {
        match event {
            EventType::PaymentCompleted(ev) => {
                for emitter in &self.payment_completed_producer {
                    debug!("📬️ Notifying payment completed hook subscribers for session {}", ev.session.id);
                    emitter.publish_event(ev.clone()).await;
                }
            },
            EventType::PaymentAborted(ev) => {
                for emitter in &self.payment_aborted_producer {
                    debug!("📬️ Notifying payment aborted hook subscribers for session {}", ev.session.id);
                    emitter.publish_event(ev.clone()).await;
                }
            },
        }
    }
}

pub struct EventHandlers {
    pub on_payment_completed: Option<EventHandler<PaymentCompletedEvent>>,
    pub on_payment_aborted: Option<EventHandler<PaymentAbortedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_completed = hooks.on_payment_completed.map(|f| EventHandler::new(buffer_size, f));
        let on_payment_aborted = hooks.on_payment_aborted.map(|f| EventHandler::new(buffer_size, f));
        Self { on_payment_completed, on_payment_aborted }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_completed {
            result.payment_completed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payment_aborted {
            result.payment_aborted_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_completed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_payment_aborted {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_completed: Option<Handler<PaymentCompletedEvent>>,
    pub on_payment_aborted: Option<Handler<PaymentAbortedEvent>>,
}

impl EventHooks {
    pub fn on_payment_completed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentCompletedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_completed = Some(Arc::new(f));
        self
    }

    pub fn on_payment_aborted<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentAbortedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_aborted = Some(Arc::new(f));
        self
    }
}
