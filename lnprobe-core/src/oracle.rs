use crate::error::OracleError;
use async_trait::async_trait;
use log::trace;
use serde::Deserialize;
use std::time::Duration;

#[cfg(test)]
use mockall::{automock, predicate::*};

pub const MAINNET_HEIGHT_URL: &str = "https://blockchain.info/latestblock";
pub const TESTNET_HEIGHT_URL: &str = "https://api.blockcypher.com/v1/btc/test3";

const ORACLE_TIMEOUT_SECS: u64 = 30;

/// Public source for the current height of the best chain.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainHeightOracle: Send + Sync {
    async fn chain_height(&self) -> Result<u32, OracleError>;
}

// Both blockchain.info and blockcypher answer with a top-level `height`.
#[derive(Deserialize)]
struct HeightResponse {
    height: u32,
}

pub struct HttpHeightOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpHeightOracle {
    pub fn new(url: impl Into<String>) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ORACLE_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChainHeightOracle for HttpHeightOracle {
    async fn chain_height(&self) -> Result<u32, OracleError> {
        let response: HeightResponse = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        trace!("{} reports height {}", self.url, response.height);
        Ok(response.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_oracle_formats() {
        let blockchain_info = r#"{"hash":"00000000000000000002","time":1700000000,"block_index":818000,"height":818000,"txIndexes":[]}"#;
        let parsed: HeightResponse = serde_json::from_str(blockchain_info).unwrap();
        assert_eq!(parsed.height, 818_000);

        let blockcypher = r#"{"name":"BTC.test3","height":2540000,"hash":"0000","peer_count":250}"#;
        let parsed: HeightResponse = serde_json::from_str(blockcypher).unwrap();
        assert_eq!(parsed.height, 2_540_000);
    }

    #[test]
    fn builds_client_for_url() {
        let oracle = HttpHeightOracle::new(TESTNET_HEIGHT_URL).unwrap();
        assert_eq!(oracle.url(), TESTNET_HEIGHT_URL);
    }
}
