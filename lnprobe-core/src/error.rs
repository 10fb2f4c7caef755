use crate::probe::FailureDetail;
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC error code lightningd returns when `getroute` finds nothing.
pub const ROUTE_NOT_FOUND_CODE: i64 = 205;

#[derive(Error, Debug)]
/// An error raised while preparing or running a probe sweep.
pub enum ProbeError {
    /// The local node is behind the chain tip.
    #[error("Node is not synchronized (local height {local}, network height {remote}).")]
    SyncNotReady { local: u32, remote: u32 },
    /// No route for the given destination could be found.
    #[error("Failed to find route to {destination}.")]
    RouteNotFound {
        destination: String,
        #[source]
        source: RpcError,
    },
    /// The probe payment was sent or awaited and did not settle.
    #[error("Probe payment failed with {}.", .failure.failcode)]
    PaymentDispatchFailed { failure: FailureDetail },
    /// Persistence failed.
    #[error("Failed to persist probe outcome: {source}")]
    PersistenceFailed {
        #[from]
        source: PersistError,
    },
    /// The configuration could not be loaded or is malformed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A full probe was requested but the node has no channels.
    #[error("Node is not funded, no channels found.")]
    NotFunded,
    /// The wallet command line could not be run.
    #[error("Failed to conduct wallet operation: {0}")]
    WalletOperationFailed(String),
    /// A lightningd call needed before the sweep failed.
    #[error("Lightning RPC call failed: {0}")]
    Rpc(#[from] RpcError),
    /// The chain height oracle could not be queried.
    #[error("Failed to get chain height: {0}")]
    Oracle(#[from] OracleError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing config value {0}")]
    Missing(&'static str),
    #[error("Unsupported network {0}, expected mainnet or testnet")]
    InvalidNetwork(String),
    /// A given peer info could not be parsed.
    #[error("Failed to parse the given peer information: {0}")]
    PeerInfoParseFailed(String),
}

#[derive(Error, Debug)]
pub enum RpcError {
    /// lightningd answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("Failed to talk to lightning-rpc socket: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize or deserialize RPC payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unexpected RPC response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// The `data` payload lightningd attaches to payment failures.
    pub fn data(&self) -> Option<&Value> {
        match self {
            RpcError::Server { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Failed to reach chain height oracle: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to write to postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("Failed to serialize route")]
    SerdeError {
        #[from]
        source: serde_json::Error,
    },
    #[error("Failed to get lock on memory storage")]
    LockError,
}

impl PartialEq for PersistError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Postgres(e), Self::Postgres(e2)) => e.to_string() == e2.to_string(),
            (Self::SerdeError { .. }, Self::SerdeError { .. }) => true,
            (Self::LockError, Self::LockError) => true,
            _ => false,
        }
    }
}
