use thiserror::Error;

use crate::card_terminal::CodecError;

#[derive(Debug, Clone, Error)]
pub enum CardTerminalError {
    #[error("Could not connect to the card terminal at {address}. {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("Timed out connecting to the card terminal at {0}")]
    ConnectTimeout(String),
    #[error("Connection to the card terminal failed. {0}")]
    Io(String),
    #[error("The card terminal closed the connection before the transaction completed")]
    ConnectionClosed,
    #[error("The card transaction timed out")]
    TransactionTimeout,
    #[error("The card terminal sent a corrupt frame. {0}")]
    Codec(#[from] CodecError),
}

impl CardTerminalError {
    /// A short tag for the session's `last_event`.
    pub fn event_tag(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } | Self::ConnectTimeout(_) => "connect_failed",
            Self::Io(_) => "io_error",
            Self::ConnectionClosed => "connection_closed",
            Self::TransactionTimeout => "timeout",
            Self::Codec(_) => "framing_error",
        }
    }
}
