use clap::Parser;
use dotenvy::dotenv;
use log::*;
use pos_payment_engine::EngineConfig;

mod command_def;
mod command_handler;

use command_def::{Arguments, Command};
use command_handler::{print_config, run_payment};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file_or_default(path).with_env_overrides(),
        None => EngineConfig::from_env_or_default(),
    };
    debug!("🪛️ Configuration loaded");
    let result = match cli.command {
        Command::Pay(params) => run_payment(config, params).await,
        Command::ShowConfig => {
            print_config(&config);
            Ok(())
        },
    };
    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
