use std::time::Duration;

use log::*;
use pos_common::Secret;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://127.0.0.1:443";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_CURRENCY: &str = "EUR";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_PAYMENT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_START_GRACE_SECS: u64 = 10;

/// Connection and timing settings for a cash recycler.
///
/// Every field has a default, so a partial (or empty) configuration table is always valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CashRecyclerConfig {
    /// e.g. "https://10.0.0.20:443". Paths are appended verbatim.
    pub base_url: String,
    pub username: String,
    pub password: Secret<String>,
    pub currency: String,
    /// The machines ship with self-signed certificates, so this is on unless explicitly disabled.
    pub accept_invalid_certs: bool,
    pub http_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Wall-clock limit for a payment, measured from session creation.
    pub payment_timeout_secs: u64,
    /// How long an idle reading is read as "not started yet" before the machine was ever seen working.
    pub start_grace_secs: u64,
}

impl Default for CashRecyclerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: Secret::default(),
            currency: DEFAULT_CURRENCY.to_string(),
            accept_invalid_certs: true,
            http_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            payment_timeout_secs: DEFAULT_PAYMENT_TIMEOUT_SECS,
            start_grace_secs: DEFAULT_START_GRACE_SECS,
        }
    }
}

impl CashRecyclerConfig {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: Secret::new(password.to_string()),
            ..Default::default()
        }
    }

    /// Overrides the connection settings with `POS_CASH_URL`, `POS_CASH_USERNAME` and `POS_CASH_PASSWORD` if they are
    /// set. The password is best kept out of configuration files altogether.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("POS_CASH_URL") {
            debug!("💵️ Cash recycler url overridden by POS_CASH_URL");
            self.base_url = url;
        }
        if let Ok(username) = std::env::var("POS_CASH_USERNAME") {
            self.username = username;
        }
        match std::env::var("POS_CASH_PASSWORD") {
            Ok(password) => self.password = Secret::new(password),
            Err(_) if self.password.reveal().is_empty() => {
                warn!("💵️ No cash recycler password is configured. Set POS_CASH_PASSWORD if logins fail.");
            },
            Err(_) => {},
        }
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_secs(self.start_grace_secs)
    }
}
