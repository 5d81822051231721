use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pos_payment_engine::DeviceKind;

#[derive(Parser, Debug)]
#[command(version, about = "Run payments against the POS card terminal and cash recycler")]
pub struct Arguments {
    /// The configuration file. Defaults to $POS_CONFIG_FILE, then ~/.pos_tools/config.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take one payment and follow it until it completes. Ctrl-C cancels it.
    #[clap(name = "pay")]
    Pay(PayParams),
    /// Print the effective configuration
    #[clap(name = "config")]
    ShowConfig,
}

#[derive(Debug, Args)]
pub struct PayParams {
    /// The payment device: 'card' or 'cash'
    pub device: DeviceKind,
    /// The amount, in minor units (cents)
    pub amount: i64,
    /// Commit cash payments as soon as all the money is in
    #[arg(short = 'f', long = "auto-finish")]
    pub auto_finish: bool,
    /// How often to print the session status, in milliseconds
    #[arg(short = 'p', long = "poll-ms", default_value = "500")]
    pub poll_ms: u64,
    /// Print the final session as JSON
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}
