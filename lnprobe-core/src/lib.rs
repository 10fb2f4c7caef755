#![crate_name = "lnprobe_core"]
//! Probe the reachability of lightning nodes with payments nobody can claim.
//!
//! A sweep waits for lightningd to catch up with the chain, then asks for a
//! route to every node in the gossip graph and sends a payment along it whose
//! hash has no known preimage. The payment always fails somewhere, and where
//! and why it fails is written to an outcome table.

pub mod catalog;
pub mod config;
pub mod error;
pub mod oracle;
pub mod probe;
pub mod prober;
pub mod recorder;
pub mod rpc;
pub mod sweep;
pub mod sync;
pub mod utils;
pub mod wallet;

pub use bitcoin;

pub use crate::catalog::NodeCatalog;
pub use crate::config::{ProbeConfig, RunMode};
pub use crate::error::{ConfigError, OracleError, PersistError, ProbeError, RpcError};
pub use crate::oracle::{ChainHeightOracle, HttpHeightOracle};
pub use crate::probe::{FailureDetail, PaymentHash, ProbeAttempt, ProbeOutcome, ProbeRecord};
pub use crate::prober::{RouteProber, SweepSummary};
pub use crate::recorder::{MemoryRecorder, OutcomeRecorder, PostgresRecorder};
pub use crate::rpc::{ClnRpc, LightningRpc};
pub use crate::sweep::{RunOutcome, Sweep};
pub use crate::sync::SyncGate;
pub use crate::wallet::{ElectrumCli, WalletCli};
