//! Client for the Core Lightning JSON-RPC interface.
//!
//! lightningd listens on a unix domain socket (`lightning-rpc` inside its
//! network directory). Each call opens a fresh connection, writes one
//! JSON-RPC 2.0 request and reads back a single JSON object.

use crate::error::RpcError;
use crate::probe::PaymentHash;
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[cfg(test)]
use mockall::{automock, predicate::*};

#[derive(Clone, Debug, Deserialize)]
pub struct GetInfo {
    pub id: String,
    pub blockheight: u32,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NodeEntry {
    pub nodeid: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub last_timestamp: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListNodes {
    pub nodes: Vec<NodeEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FundsChannel {
    pub peer_id: String,
    #[serde(default)]
    pub short_channel_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub connected: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListFunds {
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub channels: Vec<FundsChannel>,
}

/// A single hop of a route as returned by `getroute` and accepted by `sendpay`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub id: String,
    pub channel: String,
    #[serde(default)]
    pub direction: u8,
    #[serde(deserialize_with = "deserialize_msat")]
    pub amount_msat: u64,
    pub delay: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GetRoute {
    pub route: Vec<RouteHop>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SendPay {
    pub payment_hash: String,
    pub status: String,
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Connect {
    pub id: String,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Peer {
    pub id: String,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListPeers {
    pub peers: Vec<Peer>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewAddr {
    #[serde(default)]
    pub bech32: Option<String>,
    #[serde(default)]
    pub p2tr: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Withdraw {
    pub txid: String,
    #[serde(default)]
    pub tx: Option<String>,
}

// Older lightningd versions render amounts as "1000msat" strings.
fn deserialize_msat<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawMsat {
        Int(u64),
        Str(String),
    }

    match RawMsat::deserialize(deserializer)? {
        RawMsat::Int(msat) => Ok(msat),
        RawMsat::Str(s) => s
            .trim_end_matches("msat")
            .parse()
            .map_err(serde::de::Error::custom),
    }
}

/// The lightningd calls the prober needs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LightningRpc: Send + Sync {
    async fn getinfo(&self) -> Result<GetInfo, RpcError>;
    async fn listnodes(&self) -> Result<ListNodes, RpcError>;
    async fn listfunds(&self) -> Result<ListFunds, RpcError>;
    async fn getroute(
        &self,
        id: &str,
        amount_msat: u64,
        riskfactor: u64,
    ) -> Result<GetRoute, RpcError>;
    async fn sendpay(
        &self,
        route: &[RouteHop],
        payment_hash: &PaymentHash,
    ) -> Result<SendPay, RpcError>;
    async fn waitsendpay(&self, payment_hash: &PaymentHash) -> Result<SendPay, RpcError>;
    async fn connect(&self, id: &PublicKey, host: &str, port: u16) -> Result<Connect, RpcError>;
    async fn listpeers(&self) -> Result<ListPeers, RpcError>;
    async fn newaddr(&self) -> Result<NewAddr, RpcError>;
    async fn withdraw(&self, destination: &str) -> Result<Withdraw, RpcError>;
}

/// [`LightningRpc`] over lightningd's unix socket.
pub struct ClnRpc {
    socket_path: PathBuf,
    id: AtomicUsize,
}

impl ClnRpc {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            id: AtomicUsize::new(0),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Calls a method with named parameters and interprets the result as `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.id.fetch_add(1, Ordering::AcqRel),
            "method": method,
            "params": params,
        });
        trace!("lightning-rpc request: {request}");

        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream.write_all(&serde_json::to_vec(&request)?).await?;
        stream.flush().await?;

        let response = read_response(&mut stream).await?;
        trace!("lightning-rpc response: {response}");
        parse_response(response)
    }
}

/// lightningd ends every response with a blank line.
const RESPONSE_TERMINATOR: &[u8] = b"\n\n";

/// Reads one response and parses it once the terminator arrives, or the
/// peer closes the connection.
async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Value, RpcError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }

        // the terminator may straddle two reads
        let scan_from = buf.len().saturating_sub(RESPONSE_TERMINATOR.len() - 1);
        buf.extend_from_slice(&chunk[..read]);
        if buf[scan_from..]
            .windows(RESPONSE_TERMINATOR.len())
            .any(|window| window == RESPONSE_TERMINATOR)
        {
            break;
        }
    }

    match serde_json::from_slice::<Value>(&buf) {
        Ok(value) => Ok(value),
        Err(e) if e.is_eof() => Err(RpcError::InvalidResponse(
            "connection closed before a complete response".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

fn parse_response<T: DeserializeOwned>(mut response: Value) -> Result<T, RpcError> {
    if !response.is_object() {
        return Err(RpcError::InvalidResponse(
            "expected JSON object".to_string(),
        ));
    }

    let error = response["error"].take();
    if !error.is_null() {
        let data = match error.get("data") {
            Some(Value::Null) | None => None,
            Some(data) => Some(data.clone()),
        };
        return Err(RpcError::Server {
            code: error["code"].as_i64().unwrap_or(-1),
            message: error["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
            data,
        });
    }

    let result = response["result"].take();
    if result.is_null() {
        return Err(RpcError::InvalidResponse(
            "expected JSON result".to_string(),
        ));
    }

    Ok(serde_json::from_value(result)?)
}

#[async_trait]
impl LightningRpc for ClnRpc {
    async fn getinfo(&self) -> Result<GetInfo, RpcError> {
        self.call("getinfo", json!({})).await
    }

    async fn listnodes(&self) -> Result<ListNodes, RpcError> {
        self.call("listnodes", json!({})).await
    }

    async fn listfunds(&self) -> Result<ListFunds, RpcError> {
        self.call("listfunds", json!({})).await
    }

    async fn getroute(
        &self,
        id: &str,
        amount_msat: u64,
        riskfactor: u64,
    ) -> Result<GetRoute, RpcError> {
        debug!("getroute to {id} for {amount_msat} msat");
        self.call(
            "getroute",
            json!({
                "id": id,
                "amount_msat": amount_msat,
                "riskfactor": riskfactor,
            }),
        )
        .await
    }

    async fn sendpay(
        &self,
        route: &[RouteHop],
        payment_hash: &PaymentHash,
    ) -> Result<SendPay, RpcError> {
        self.call(
            "sendpay",
            json!({
                "route": route,
                "payment_hash": payment_hash.to_string(),
            }),
        )
        .await
    }

    async fn waitsendpay(&self, payment_hash: &PaymentHash) -> Result<SendPay, RpcError> {
        self.call(
            "waitsendpay",
            json!({ "payment_hash": payment_hash.to_string() }),
        )
        .await
    }

    async fn connect(&self, id: &PublicKey, host: &str, port: u16) -> Result<Connect, RpcError> {
        self.call(
            "connect",
            json!({
                "id": id.to_string(),
                "host": host,
                "port": port,
            }),
        )
        .await
    }

    async fn listpeers(&self) -> Result<ListPeers, RpcError> {
        self.call("listpeers", json!({})).await
    }

    async fn newaddr(&self) -> Result<NewAddr, RpcError> {
        self.call("newaddr", json!({})).await
    }

    async fn withdraw(&self, destination: &str) -> Result<Withdraw, RpcError> {
        self.call(
            "withdraw",
            json!({
                "destination": destination,
                "satoshi": "all",
            }),
        )
        .await
    }
}
