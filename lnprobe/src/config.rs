use clap::Parser;
use lnprobe_core::bitcoin::Network;
use lnprobe_core::config::parse_network;
use lnprobe_core::ConfigError;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(version, author, about)]
/// Lightning route prober
pub struct Config {
    #[clap(default_value = "config.toml", short, long, env = "LNPROBE_CONFIG")]
    /// Location of the probe configuration file
    pub config: PathBuf,
    #[clap(short, long)]
    /// Network to probe ["mainnet", "testnet"], overrides the config file
    pub network: Option<String>,
    #[clap(long)]
    /// Keep outcomes in memory and skip the wallet and database
    pub dry_run: bool,
    #[clap(short, long)]
    /// Log at debug level unless RUST_LOG is set
    pub verbose: bool,
}

impl Config {
    pub fn network(&self) -> Result<Option<Network>, ConfigError> {
        self.network.as_deref().map(parse_network).transpose()
    }
}
