//! POS Payment Engine
//!
//! The payment engine runs payment sessions against the two payment devices at a point of sale: a card terminal that
//! speaks length-prefixed XML over TCP, and a cash recycler with an HTTPS JSON API that has to be polled.
//!
//! The library is divided into the following sections:
//! 1. The session model ([`mod@session_types`]) and the in-memory [`SessionRegistry`] that owns every session and
//!    enforces its state graph.
//! 2. The device integrations ([`mod@card_terminal`] and [`mod@cash_recycler`]). Each session is driven by one
//!    background task that reports what the device says back into the registry.
//! 3. The public API, [`PaymentSessionApi`], which starts, inspects, cancels and commits sessions without ever waiting
//!    on a device.
//!
//! The engine also emits an event when a session ends, either [`events::PaymentCompletedEvent`] or
//! [`events::PaymentAbortedEvent`]. Use [`events::EventHooks`] to react to them, e.g. to store the order or print a
//! receipt.
pub mod card_terminal;
pub mod cash_recycler;
pub mod config;
pub mod events;
mod ppe_api;
pub mod session_registry;
pub mod session_types;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::{CardTerminalConfig, ConfigError, EngineConfig, SessionConfig};
pub use ppe_api::{errors::SessionApiError, session_api::PaymentSessionApi};
pub use session_registry::{SessionControl, SessionRegistry, SessionUpdater};
pub use session_types::{DeviceKind, Session, SessionDetails, SessionId, SessionState};
