use crate::error::ConfigError;
use crate::oracle::{MAINNET_HEIGHT_URL, TESTNET_HEIGHT_URL};
use crate::utils::expand_home;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Network;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROBING_VALUE_MSAT: u64 = 200_000_000;
pub const DEFAULT_LIGHTNING_PORT: u16 = 9735;
const DEFAULT_SYNC_BACKOFF_SECS: u64 = 30;
const DEFAULT_BALANCE_POLL_SECS: u64 = 60;

/// Settings for one probing run. Built once at startup and never mutated.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub network: Network,
    pub rpc_path: PathBuf,
    pub database: DatabaseConfig,
    pub table_name: String,
    pub run_full_probe: bool,
    pub probing_value_msat: u64,
    pub probing_run_id: Option<String>,
    pub initial_peer: PeerAddress,
    pub withdraw_now: bool,
    pub withdrawal_address: Option<String>,
    pub oracle_url: String,
    pub sync_backoff: Duration,
    pub balance_poll: Duration,
    pub wallet_command: String,
}

/// What the run does once setup is complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    FullProbe,
    Withdraw { address: String },
    Idle,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    pub dbname: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

/// A `pubkey@host:port` peer to open the first connection to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAddress {
    pub pubkey: PublicKey,
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn parse(connection: &str) -> Result<Self, ConfigError> {
        let (pubkey, peer_addr_str) = split_peer_connection_string(connection.trim())?;

        let (host, port) = match peer_addr_str.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ConfigError::PeerInfoParseFailed(connection.to_string()))?;
                (host.to_string(), port)
            }
            None => (peer_addr_str, DEFAULT_LIGHTNING_PORT),
        };

        if host.is_empty() {
            return Err(ConfigError::PeerInfoParseFailed(connection.to_string()));
        }

        Ok(Self { pubkey, host, port })
    }
}

fn split_peer_connection_string(
    peer_pubkey_and_ip_addr: &str,
) -> Result<(PublicKey, String), ConfigError> {
    let parse_failed = || ConfigError::PeerInfoParseFailed(peer_pubkey_and_ip_addr.to_string());

    let (pubkey, peer_addr_str) = peer_pubkey_and_ip_addr
        .split_once('@')
        .ok_or_else(parse_failed)?;
    let pubkey = PublicKey::from_str(pubkey).map_err(|_| parse_failed())?;
    Ok((pubkey, peer_addr_str.to_string()))
}

/// Accepts the names lightningd and the height oracles use.
pub fn parse_network(network: &str) -> Result<Network, ConfigError> {
    match network.to_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        other => Err(ConfigError::InvalidNetwork(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    database: DatabaseConfig,
    lightning: LightningSection,
    table: TableSection,
    #[serde(default)]
    settings: SettingsSection,
    channel: ChannelSection,
    #[serde(default)]
    withdrawal: WithdrawalSection,
    #[serde(default)]
    oracle: OracleSection,
    #[serde(default)]
    wallet: WalletSection,
}

#[derive(Debug, Deserialize)]
struct LightningSection {
    rpc_path: Option<String>,
    rpc_path_mainnet: Option<String>,
    rpc_path_testnet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSection {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SettingsSection {
    #[serde(default = "default_network")]
    network: String,
    #[serde(default)]
    run_full_probe: bool,
    #[serde(default = "default_probing_value")]
    probing_value_msats: u64,
    probing_run_id: Option<String>,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            network: default_network(),
            run_full_probe: false,
            probing_value_msats: DEFAULT_PROBING_VALUE_MSAT,
            probing_run_id: None,
        }
    }
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_probing_value() -> u64 {
    DEFAULT_PROBING_VALUE_MSAT
}

#[derive(Debug, Deserialize)]
struct ChannelSection {
    initial_channel: Option<String>,
    peer_id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct WithdrawalSection {
    #[serde(default)]
    withdraw_now: bool,
    withdrawal_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OracleSection {
    mainnet_url: Option<String>,
    testnet_url: Option<String>,
    sync_backoff_secs: Option<u64>,
    balance_poll_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WalletSection {
    command: Option<String>,
}

impl ProbeConfig {
    /// Reads the TOML file at `path`. `network` overrides `settings.network`.
    pub fn load<P: AsRef<Path>>(path: P, network: Option<Network>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, network)
    }

    pub fn from_toml_str(text: &str, network: Option<Network>) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;

        let network = match network {
            Some(network) => network,
            None => parse_network(&file.settings.network)?,
        };

        let rpc_path = match network {
            Network::Bitcoin => file.lightning.rpc_path_mainnet,
            _ => file.lightning.rpc_path_testnet,
        }
        .or(file.lightning.rpc_path)
        .ok_or(ConfigError::Missing("lightning.rpc_path"))?;

        let initial_peer = match file.channel.initial_channel {
            Some(connection) => PeerAddress::parse(&connection)?,
            None => {
                let peer_id = file
                    .channel
                    .peer_id
                    .ok_or(ConfigError::Missing("channel.initial_channel"))?;
                let host = file.channel.host.ok_or(ConfigError::Missing("channel.host"))?;
                let port = file.channel.port.unwrap_or(DEFAULT_LIGHTNING_PORT);
                PeerAddress::parse(&format!("{peer_id}@{host}:{port}"))?
            }
        };

        if file.withdrawal.withdraw_now && file.withdrawal.withdrawal_address.is_none() {
            return Err(ConfigError::Missing("withdrawal.withdrawal_address"));
        }

        let oracle_url = match network {
            Network::Bitcoin => file
                .oracle
                .mainnet_url
                .unwrap_or_else(|| MAINNET_HEIGHT_URL.to_string()),
            _ => file
                .oracle
                .testnet_url
                .unwrap_or_else(|| TESTNET_HEIGHT_URL.to_string()),
        };

        Ok(Self {
            network,
            rpc_path: expand_home(&rpc_path),
            database: file.database,
            table_name: file.table.name,
            run_full_probe: file.settings.run_full_probe,
            probing_value_msat: file.settings.probing_value_msats,
            probing_run_id: file.settings.probing_run_id,
            initial_peer,
            withdraw_now: file.withdrawal.withdraw_now,
            withdrawal_address: file.withdrawal.withdrawal_address,
            oracle_url,
            sync_backoff: Duration::from_secs(
                file.oracle
                    .sync_backoff_secs
                    .unwrap_or(DEFAULT_SYNC_BACKOFF_SECS),
            ),
            balance_poll: Duration::from_secs(
                file.oracle
                    .balance_poll_secs
                    .unwrap_or(DEFAULT_BALANCE_POLL_SECS),
            ),
            wallet_command: file.wallet.command.unwrap_or_else(|| "electrum".to_string()),
        })
    }

    pub fn run_mode(&self) -> RunMode {
        if self.run_full_probe {
            return RunMode::FullProbe;
        }
        match (self.withdraw_now, &self.withdrawal_address) {
            (true, Some(address)) => RunMode::Withdraw {
                address: address.clone(),
            },
            _ => RunMode::Idle,
        }
    }

    pub fn is_testnet(&self) -> bool {
        self.network != Network::Bitcoin
    }
}
