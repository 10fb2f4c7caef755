use crate::error::ProbeError;
use async_trait::async_trait;
use log::info;
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;

#[cfg(test)]
use mockall::{automock, predicate::*};

/// The on-chain wallet that funds the node, driven through its CLI.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WalletCli: Send + Sync {
    /// Raw output of the wallet's balance command.
    async fn balance_report(&self) -> Result<String, ProbeError>;
}

pub struct ElectrumCli {
    command: String,
    testnet: bool,
}

impl ElectrumCli {
    pub fn new(command: impl Into<String>, testnet: bool) -> Self {
        Self {
            command: command.into(),
            testnet,
        }
    }

    fn args(&self) -> Vec<&'static str> {
        let mut args = Vec::with_capacity(2);
        if self.testnet {
            args.push("--testnet");
        }
        args.push("getbalance");
        args
    }
}

#[async_trait]
impl WalletCli for ElectrumCli {
    async fn balance_report(&self) -> Result<String, ProbeError> {
        let output = Command::new(&self.command)
            .args(self.args())
            .output()
            .await
            .map_err(|e| ProbeError::WalletOperationFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(ProbeError::WalletOperationFailed(format!(
                "{} getbalance exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// True once the report carries a non-empty `confirmed` amount.
///
/// Electrum prints `{"confirmed": "1.06396422"}` once the wallet has synced.
pub fn has_confirmed_balance(report: &str) -> bool {
    match serde_json::from_str::<Value>(report) {
        Ok(Value::Object(map)) => match map.get("confirmed") {
            Some(Value::String(amount)) => !amount.is_empty(),
            Some(Value::Number(_)) => true,
            _ => false,
        },
        _ => false,
    }
}

/// Polls the wallet until it reports a confirmed balance.
pub async fn wait_for_confirmed_balance(
    wallet: &dyn WalletCli,
    poll: Duration,
) -> Result<String, ProbeError> {
    loop {
        let report = wallet.balance_report().await?;
        info!("Recovered balance: {}", report.trim());
        if has_confirmed_balance(&report) {
            return Ok(report);
        }

        info!(
            "Balance is 0 or non existent, waiting {} seconds to try again",
            poll.as_secs()
        );
        tokio::time::sleep(poll).await;
    }
}
