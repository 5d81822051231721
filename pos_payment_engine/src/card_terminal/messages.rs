//! The XML documents exchanged with the card terminal.
//!
//! Only the handful of elements the engine acts on are read, by name. The documents are never validated against a
//! schema; a missing element simply reads as absent.
use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

use pos_common::MinorUnits;
use regex::Regex;

use crate::{config::CardTerminalConfig, session_types::CardDetails};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
/// Transaction type code for a purchase.
const PURCHASE: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialTransactionRequest {
    pub pos_id: String,
    pub sync_number: u64,
    pub amount: MinorUnits,
    pub currency_code: u16,
    pub partial_approval: bool,
}

impl FinancialTransactionRequest {
    pub fn new(config: &CardTerminalConfig, sync_number: u64, amount: MinorUnits) -> Self {
        Self {
            pos_id: config.pos_id.clone(),
            sync_number,
            amount,
            currency_code: config.currency_code,
            partial_approval: config.partial_approval,
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "{XML_DECLARATION}<DocumentRequest><FinancialTransactionRequest>\
             <PosId>{}</PosId><SyncNumber>{}</SyncNumber>\
             <TransactionType>{PURCHASE}</TransactionType><Amount>{}</Amount><CurrencyCode>{}</CurrencyCode>\
             <PartialApprovalCap>{}</PartialApprovalCap></FinancialTransactionRequest></DocumentRequest>",
            escape(&self.pos_id),
            self.sync_number,
            self.amount.value(),
            self.currency_code,
            u8::from(self.partial_approval)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortRequest {
    pub pos_id: String,
    pub sync_number: u64,
}

impl AbortRequest {
    pub fn new(pos_id: &str, sync_number: u64) -> Self {
        Self { pos_id: pos_id.to_string(), sync_number }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "{XML_DECLARATION}<DocumentRequest><AbortTransactionRequest><PosId>{}</PosId><SyncNumber>{}</SyncNumber>\
             </AbortTransactionRequest></DocumentRequest>",
            escape(&self.pos_id),
            self.sync_number
        )
    }
}

//--------------------------------------------   FinancialResult   ---------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinancialResult {
    pub approved: bool,
    pub result_code: Option<i64>,
    pub auth_result: Option<String>,
    pub auth_response_code: Option<String>,
    pub masked_pan: Option<String>,
    pub application_id: Option<String>,
    pub application_label: Option<String>,
    pub approval_code: Option<String>,
    pub amount_authorized: Option<MinorUnits>,
    pub receipt: Option<String>,
    /// Set when the frame could not be read as a financial result.
    pub error: Option<String>,
}

impl From<FinancialResult> for CardDetails {
    fn from(r: FinancialResult) -> Self {
        Self {
            sync_number: None,
            result_code: r.result_code,
            auth_result: r.auth_result,
            auth_response_code: r.auth_response_code,
            masked_pan: r.masked_pan,
            application_id: r.application_id,
            application_label: r.application_label,
            approval_code: r.approval_code,
            amount_authorized: r.amount_authorized,
            receipt: r.receipt,
            error: r.error,
        }
    }
}

/// Reads the outcome of a transaction. Never fails: a frame without a financial result reads as a declined
/// transaction with a diagnostic message in `error`.
pub fn parse_financial_result(xml: &str) -> FinancialResult {
    let Some(body) = element_text(xml, "FinancialTransactionResponse") else {
        return FinancialResult {
            error: Some("The frame does not contain a financial transaction result".to_string()),
            ..Default::default()
        };
    };
    let result_code = element_text(&body, "ResultCode").and_then(|s| s.trim().parse::<i64>().ok());
    let error = match result_code {
        None => Some("The financial result has no readable result code".to_string()),
        Some(_) => None,
    };
    FinancialResult {
        approved: result_code == Some(0),
        result_code,
        auth_result: element_text(&body, "AuthorizationResult"),
        auth_response_code: element_text(&body, "AuthorizationResponseCode"),
        masked_pan: element_text(&body, "MaskedPan"),
        application_id: element_text(&body, "ApplicationId"),
        application_label: element_text(&body, "ApplicationLabel"),
        approval_code: element_text(&body, "ApprovalCode"),
        amount_authorized: element_text(&body, "AmountAuthorized")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(MinorUnits::from),
        receipt: element_text(&body, "CustomerReceipt"),
        error,
    }
}

/// The text a display notification asks the POS to show.
pub fn display_text(xml: &str) -> Option<String> {
    element_text(xml, "Text").filter(|s| !s.trim().is_empty())
}

/// A human-readable description of an error notification.
pub fn error_text(xml: &str) -> String {
    let code = element_text(xml, "ErrorCode");
    let text = element_text(xml, "ErrorText");
    match (code, text) {
        (Some(code), Some(text)) => format!("Terminal error {code}: {text}"),
        (None, Some(text)) => format!("Terminal error: {text}"),
        (Some(code), None) => format!("Terminal error {code}"),
        (None, None) => "The terminal reported an error".to_string(),
    }
}

/// The unescaped, trimmed text content of the first `tag` element.
pub fn element_text(xml: &str, tag: &str) -> Option<String> {
    let re = element_pattern(tag)?;
    let captures = re.captures(xml)?;
    let text = captures.get(1)?.as_str();
    Some(unescape(text.trim()))
}

/// Patterns are compiled once per tag name and shared between all connections.
fn element_pattern(tag: &str) -> Option<Regex> {
    static PATTERNS: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();
    let mut patterns = PATTERNS.get_or_init(Default::default).lock().ok()?;
    if let Some(re) = patterns.get(tag) {
        return Some(re.clone());
    }
    let pattern = format!(r"(?s)<{0}(?:\s[^>]*)?>(.*?)</{0}\s*>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    patterns.insert(tag.to_string(), re.clone());
    Some(re)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;").replace('\'', "&apos;")
}

/// Longest entity body worth decoding, e.g. `#x10FFFF`.
const MAX_ENTITY_LENGTH: usize = 8;

/// Decodes the predefined entities and numeric character references in one pass. Anything else, including a CDATA
/// section, is kept verbatim.
fn unescape(s: &str) -> String {
    if let Some(cdata) = s.strip_prefix("<![CDATA[").and_then(|s| s.strip_suffix("]]>")) {
        return cdata.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let decoded = tail
            .find(';')
            .filter(|end| *end <= MAX_ENTITY_LENGTH)
            .and_then(|end| decode_entity(&tail[..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            },
            None => {
                out.push('&');
                rest = tail;
            },
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let number = entity.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        },
    }
}
