//! Card terminal integration: framing, XML messages and the per-session connection task.
mod client;
mod codec;
mod errors;
mod messages;

pub use client::{CardCommand, CardTerminalClient};
pub use codec::{
    classify,
    decode_frames,
    encode_frame,
    CodecError,
    FrameDecoder,
    MessageKind,
    LENGTH_PREFIX_SIZE,
    MAX_FRAME_LENGTH,
};
pub use errors::CardTerminalError;
pub use messages::{
    display_text,
    element_text,
    error_text,
    parse_financial_result,
    AbortRequest,
    FinancialResult,
    FinancialTransactionRequest,
};
