//! A stand-in card terminal and environment setup, for tests and demos.
mod fake_card_terminal;
pub mod prepare_env;

pub use fake_card_terminal::{
    abort_notification_xml,
    card_entry_xml,
    card_removal_xml,
    display_xml,
    error_xml,
    financial_result_xml,
    ConnectionRecord,
    FakeCardTerminal,
    TerminalStep,
};
