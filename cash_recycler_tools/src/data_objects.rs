use std::fmt::Display;

use pos_common::MinorUnits;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LoginResponse {
    #[serde(alias = "accessToken", alias = "access_token")]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartPaymentRequest {
    pub amount: MinorUnits,
    pub reference: String,
    pub queueing_allowed: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StartPaymentResponse {
    pub transaction_id: Option<String>,
}

/// Body of the commit (finish) and cancel requests.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettleRequest<'a> {
    pub reference: &'a str,
}

//-------------------------------------------   OperationStatus   -----------------------------------------------------
/// The machine's `operation` flag.
///
/// `Idle` is reported both before a transaction starts and after it has fully completed. Anything else means the
/// machine is working on a transaction; the exact label is kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OperationStatus {
    #[default]
    Idle,
    Busy(String),
}

impl OperationStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl From<&str> for OperationStatus {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("idle") {
            Self::Idle
        } else {
            Self::Busy(value.to_ascii_uppercase())
        }
    }
}

impl Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::Busy(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for OperationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(OperationStatus::from).unwrap_or_default())
    }
}

//-------------------------------------------   ActiveTransaction   ---------------------------------------------------
/// A reading from the active-transaction endpoint.
///
/// The response is sparse: any field may be missing, and the dispensed figures disappear again once the machine
/// returns to idle.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ActiveTransaction {
    pub operation: OperationStatus,
    pub requested: Option<MinorUnits>,
    pub inserted: Option<MinorUnits>,
    pub dispensed: Option<MinorUnits>,
    pub not_dispensed: Option<MinorUnits>,
}

impl ActiveTransaction {
    pub fn running(requested: i64, inserted: i64) -> Self {
        Self {
            operation: OperationStatus::Busy("RUNNING".into()),
            requested: Some(requested.into()),
            inserted: Some(inserted.into()),
            ..Default::default()
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }
}

//-------------------------------------------   LastTransaction     ---------------------------------------------------
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Denomination {
    pub value: MinorUnits,
    #[serde(alias = "quantity")]
    pub count: i64,
}

/// The most recently completed transaction, as reported by the last-transaction endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LastTransaction {
    pub reference: Option<String>,
    pub requested: Option<MinorUnits>,
    pub inserted: Option<MinorUnits>,
    pub dispensed: Option<MinorUnits>,
    pub not_dispensed: Option<MinorUnits>,
    pub dispensed_denominations: Vec<Denomination>,
}

impl LastTransaction {
    /// The dispensed change. Some firmware omits the scalar and only reports the breakdown by denomination.
    ///
    /// Returns `None` if the breakdown does not add up to a representable amount.
    pub fn dispensed_total(&self) -> Option<MinorUnits> {
        if self.dispensed.is_some() {
            return self.dispensed;
        }
        self.dispensed_denominations
            .iter()
            .try_fold(MinorUnits::ZERO, |total, d| d.value.checked_mul(d.count).and_then(|v| total.checked_add(v)))
    }

    pub fn not_dispensed_total(&self) -> MinorUnits {
        self.not_dispensed.unwrap_or_default()
    }
}
