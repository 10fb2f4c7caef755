use crate::catalog::NodeCatalog;
use crate::config::{ProbeConfig, RunMode};
use crate::error::ProbeError;
use crate::oracle::ChainHeightOracle;
use crate::prober::{RouteProber, SweepSummary};
use crate::recorder::OutcomeRecorder;
use crate::rpc::{LightningRpc, Withdraw};
use crate::sync::SyncGate;
use crate::wallet::{wait_for_confirmed_balance, WalletCli};
use log::{info, warn};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Probed(SweepSummary),
    Withdrew(Withdraw),
    /// Neither probing nor withdrawing was requested.
    Idle,
}

/// One probing run against a single lightningd.
pub struct Sweep {
    config: ProbeConfig,
    rpc: Arc<dyn LightningRpc>,
}

impl Sweep {
    pub fn new(config: ProbeConfig, rpc: Arc<dyn LightningRpc>) -> Self {
        Self { config, rpc }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Waits for a funded wallet, when one is given, and for chain sync.
    pub async fn prepare(
        &self,
        wallet: Option<&dyn WalletCli>,
        oracle: Arc<dyn ChainHeightOracle>,
    ) -> Result<(), ProbeError> {
        if let Some(wallet) = wallet {
            info!("Checking wallet balance...");
            wait_for_confirmed_balance(wallet, self.config.balance_poll).await?;
        }

        SyncGate::new(self.rpc.clone(), oracle, self.config.sync_backoff)
            .wait_until_synchronized()
            .await;
        Ok(())
    }

    /// Connects to the initial peer and then probes, withdraws or idles.
    pub async fn run(&self, recorder: Arc<dyn OutcomeRecorder>) -> Result<RunOutcome, ProbeError> {
        if let Some(run_id) = &self.config.probing_run_id {
            info!("Probing run ID: {run_id}");
        }

        let catalog = NodeCatalog::load(self.rpc.as_ref()).await?;

        let funds = self.rpc.listfunds().await?;
        info!(
            "Funds available: {} outputs, {} channels",
            funds.outputs.len(),
            funds.channels.len()
        );

        let address = self.rpc.newaddr().await?;
        match address.bech32.or(address.p2tr) {
            Some(address) => info!("Payment address: {address}"),
            None => warn!("newaddr returned no address"),
        }

        let peer = &self.config.initial_peer;
        info!(
            "Connecting to initial node {}@{}:{}",
            peer.pubkey, peer.host, peer.port
        );
        self.rpc.connect(&peer.pubkey, &peer.host, peer.port).await?;
        info!("Connected to initial node");

        let peers = self.rpc.listpeers().await?;
        info!(
            "Peers: {} known, {} connected",
            peers.peers.len(),
            peers.peers.iter().filter(|p| p.connected).count()
        );

        match self.config.run_mode() {
            RunMode::FullProbe => {
                info!("Check if the node is funded...");
                if funds.channels.is_empty() {
                    return Err(ProbeError::NotFunded);
                }
                info!(
                    "Node is funded, probing with {} msat",
                    self.config.probing_value_msat
                );

                let prober = RouteProber::new(
                    self.rpc.clone(),
                    recorder,
                    self.config.probing_value_msat,
                );
                Ok(RunOutcome::Probed(prober.sweep(&catalog).await))
            }
            RunMode::Withdraw { address } => {
                info!("Withdrawing to the specified address: {address}");
                let withdraw = self.rpc.withdraw(&address).await?;
                info!("Withdrawal successful: {}", withdraw.txid);
                Ok(RunOutcome::Withdrew(withdraw))
            }
            RunMode::Idle => {
                info!("Not running full probe, waiting for manual intervention");
                Ok(RunOutcome::Idle)
            }
        }
    }
}
