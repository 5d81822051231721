//! Client for the HTTPS session API exposed by cash recycling machines.
//!
//! The machine never pushes events. A payment is started with [`CashRecyclerClient::start_payment`] and its progress
//! is reconstructed by polling the active-transaction and last-transaction endpoints. Every call is authorised with a
//! bearer token that is obtained with the configured credentials and cached until the machine rejects it.
mod api;
mod config;
mod data_objects;
mod error;
pub mod helpers;


pub use api::CashRecyclerClient;
pub use config::CashRecyclerConfig;
pub use data_objects::{
    ActiveTransaction,
    Denomination,
    LastTransaction,
    OperationStatus,
    SettleRequest,
    StartPaymentRequest,
    StartPaymentResponse,
};
pub use error::CashRecyclerError;
