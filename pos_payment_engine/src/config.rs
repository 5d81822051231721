use std::{
    env,
    fs,
    io,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};

use cash_recycler_tools::CashRecyclerConfig;
use chrono::Duration;
use log::*;
use pos_common::helpers::parse_boolean_flag;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_DIR: &str = ".pos_tools";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const DEFAULT_CARD_HOST: &str = "127.0.0.1";
const DEFAULT_CARD_PORT: u16 = 2000;
const DEFAULT_POS_ID: &str = "POS001";
/// ISO 4217 numeric code for EUR.
const DEFAULT_CURRENCY_CODE: u16 = 978;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_ABORT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SESSION_TTL_SECS: i64 = 600;
const DEFAULT_FINALIZED_TTL_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read the configuration file. {0}")]
    Io(#[from] io::Error),
    #[error("The configuration file is not valid TOML. {0}")]
    Parse(#[from] toml::de::Error),
}

/// The complete engine configuration. Loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub card_terminal: CardTerminalConfig,
    pub cash_recycler: CashRecyclerConfig,
    pub sessions: SessionConfig,
}

//--------------------------------------------   CardTerminalConfig   ------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CardTerminalConfig {
    pub host: String,
    pub port: u16,
    pub pos_id: String,
    pub currency_code: u16,
    /// Tells the terminal whether it may approve less than the requested amount.
    pub partial_approval: bool,
    pub connect_timeout_ms: u64,
    /// Wall-clock limit for one transaction, measured from the moment the request is sent.
    pub transaction_timeout_secs: u64,
    /// Bound on the fallback abort connection.
    pub abort_timeout_ms: u64,
}

impl Default for CardTerminalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CARD_HOST.to_string(),
            port: DEFAULT_CARD_PORT,
            pos_id: DEFAULT_POS_ID.to_string(),
            currency_code: DEFAULT_CURRENCY_CODE,
            partial_approval: false,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            transaction_timeout_secs: DEFAULT_TRANSACTION_TIMEOUT_SECS,
            abort_timeout_ms: DEFAULT_ABORT_TIMEOUT_MS,
        }
    }
}

impl CardTerminalConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.connect_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.transaction_timeout_secs)
    }

    pub fn abort_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.abort_timeout_ms)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = env::var("POS_CARD_HOST") {
            self.host = host;
        }
        if let Ok(s) = env::var("POS_CARD_PORT") {
            match s.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => error!("💳️ {s} is not a valid port for POS_CARD_PORT. {e} Keeping {}.", self.port),
            }
        }
        if let Ok(pos_id) = env::var("POS_CARD_POS_ID") {
            self.pos_id = pos_id;
        }
        self.partial_approval = parse_boolean_flag(env::var("POS_CARD_PARTIAL_APPROVAL").ok(), self.partial_approval);
        self
    }
}

//--------------------------------------------   SessionConfig   -----------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions are evicted this long after their last update.
    pub ttl_secs: i64,
    /// Shortened lifetime for cash sessions that were settled by a finish or cancel request.
    pub finalized_ttl_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: DEFAULT_SESSION_TTL_SECS, finalized_ttl_secs: DEFAULT_FINALIZED_TTL_SECS }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs)
    }

    pub fn finalized_ttl(&self) -> Duration {
        Duration::seconds(self.finalized_ttl_secs)
    }
}

//--------------------------------------------   Loading   -----------------------------------------------------------
impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Loads the configuration from `path`. A missing file is not an error; neither is a broken one, but that is
    /// logged loudly, since the engine is about to talk to the default device addresses.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("🪛️ No configuration file at {}. Using the default configuration.", path.display());
            return Self::default();
        }
        Self::from_file(path).unwrap_or_else(|e| {
            error!("🪛️ Could not load the configuration from {}. {e} Using the default configuration.", path.display());
            Self::default()
        })
    }

    /// Loads the file named by `POS_CONFIG_FILE` (or the default location) and applies the environment overrides for
    /// device credentials and addresses.
    pub fn from_env_or_default() -> Self {
        let path = env::var("POS_CONFIG_FILE").map(PathBuf::from).ok().or_else(default_config_path);
        let config = match path {
            Some(p) => Self::from_file_or_default(p),
            None => {
                warn!("🪛️ Could not determine the home directory. Using the default configuration.");
                Self::default()
            },
        };
        config.with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        Self {
            card_terminal: self.card_terminal.with_env_overrides(),
            cash_recycler: self.cash_recycler.with_env_overrides(),
            sessions: self.sessions,
        }
    }
}

/// `~/.pos_tools/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
}
