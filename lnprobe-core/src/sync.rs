use crate::error::ProbeError;
use crate::oracle::ChainHeightOracle;
use crate::rpc::LightningRpc;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Blocks the sweep until lightningd has caught up with the chain tip.
///
/// Probing from a node that is still syncing gives routes built on a stale
/// graph, so there is no timeout here.
pub struct SyncGate {
    rpc: Arc<dyn LightningRpc>,
    oracle: Arc<dyn ChainHeightOracle>,
    backoff: Duration,
}

impl SyncGate {
    pub fn new(
        rpc: Arc<dyn LightningRpc>,
        oracle: Arc<dyn ChainHeightOracle>,
        backoff: Duration,
    ) -> Self {
        Self {
            rpc,
            oracle,
            backoff,
        }
    }

    /// Succeeds once the local height is at most one block behind the network.
    pub async fn check(&self) -> Result<(), ProbeError> {
        let local = self.rpc.getinfo().await?.blockheight;
        let remote = self.oracle.chain_height().await?;
        info!("Lightning block height: {local}, latest block height: {remote}");

        if local >= remote.saturating_sub(1) {
            Ok(())
        } else {
            Err(ProbeError::SyncNotReady { local, remote })
        }
    }

    /// Fetch failures on either side count as not synchronized.
    pub async fn is_synchronized(&self) -> bool {
        match self.check().await {
            Ok(()) => true,
            Err(ProbeError::SyncNotReady { .. }) => false,
            Err(e) => {
                warn!("Could not determine sync state: {e}");
                false
            }
        }
    }

    pub async fn wait_until_synchronized(&self) {
        info!("Checking if lightningd is synchronized...");
        while !self.is_synchronized().await {
            info!(
                "Not yet synchronized, waiting {} seconds...",
                self.backoff.as_secs()
            );
            tokio::time::sleep(self.backoff).await;
        }
        info!("lightningd is synchronized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OracleError, RpcError};
    use crate::oracle::MockChainHeightOracle;
    use crate::rpc::{GetInfo, MockLightningRpc};

    fn info_at(height: u32) -> GetInfo {
        GetInfo {
            id: "02self".to_string(),
            blockheight: height,
            alias: None,
            network: Some("testnet".to_string()),
        }
    }

    fn gate(rpc: MockLightningRpc, oracle: MockChainHeightOracle) -> SyncGate {
        SyncGate::new(Arc::new(rpc), Arc::new(oracle), Duration::from_millis(1))
    }

    fn oracle_at(height: u32) -> MockChainHeightOracle {
        let mut oracle = MockChainHeightOracle::new();
        oracle.expect_chain_height().returning(move || Ok(height));
        oracle
    }

    fn rpc_at(height: u32) -> MockLightningRpc {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getinfo().returning(move || Ok(info_at(height)));
        rpc
    }

    #[tokio::test]
    async fn one_block_lag_is_tolerated() {
        assert!(gate(rpc_at(100), oracle_at(100)).is_synchronized().await);
        assert!(gate(rpc_at(99), oracle_at(100)).is_synchronized().await);
        assert!(gate(rpc_at(101), oracle_at(100)).is_synchronized().await);
    }

    #[tokio::test]
    async fn two_blocks_behind_is_not_synchronized() {
        let gate = gate(rpc_at(98), oracle_at(100));
        assert!(!gate.is_synchronized().await);
        assert!(matches!(
            gate.check().await,
            Err(ProbeError::SyncNotReady {
                local: 98,
                remote: 100
            })
        ));
    }

    #[tokio::test]
    async fn fetch_failures_are_not_synchronized() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getinfo().returning(|| {
            Err(RpcError::InvalidResponse("socket gone".to_string()))
        });
        assert!(!gate(rpc, oracle_at(100)).is_synchronized().await);

        let mut oracle = MockChainHeightOracle::new();
        oracle.expect_chain_height().returning(|| {
            Err(OracleError::Http(
                reqwest::Client::new().get("not a url").build().unwrap_err(),
            ))
        });
        assert!(!gate(rpc_at(100), oracle).is_synchronized().await);
    }

    #[tokio::test]
    async fn waits_until_node_catches_up() {
        let mut rpc = MockLightningRpc::new();
        let mut height = 95;
        rpc.expect_getinfo().times(4).returning(move || {
            height += 1;
            Ok(info_at(height))
        });

        gate(rpc, oracle_at(100)).wait_until_synchronized().await;
    }
}
