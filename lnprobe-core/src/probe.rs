use crate::rpc::RouteHop;
use crate::utils;
use chrono::{DateTime, Utc};
use hex_conservative::DisplayHex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Placeholder written for any column a probe could not fill in.
pub const NONE: &str = "NONE";
/// Failcode recorded when no route to the destination exists.
pub const NO_ROUTE: &str = "NO_ROUTE";
/// Failcode recorded if a probe payment somehow settles.
pub const SUCCEEDED: &str = "SUCCEEDED";
/// Failcode recorded when a route was found but no payment went out.
pub const NOT_SENT: &str = "NOT_SENT";

/// A payment hash nobody knows the preimage to.
///
/// Every probe draws a new one from the operating system's RNG, so the
/// destination can never claim the payment and each HTLC fails back to us.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentHash(pub [u8; 32]);

impl PaymentHash {
    pub fn random() -> Result<Self, getrandom::Error> {
        let mut entropy = [0u8; 32];
        getrandom::getrandom(&mut entropy)?;
        Ok(Self(entropy))
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..].to_lower_hex_string())
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({self})")
    }
}

/// Where and why a probe payment was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub failcode: String,
    pub erring_node: String,
    pub erring_channel: String,
}

impl FailureDetail {
    /// Extracts the failure from a `sendpay`/`waitsendpay` error payload.
    ///
    /// The symbolic `failcodename` is preferred over the numeric `failcode`.
    /// Anything missing becomes [`NONE`].
    pub fn from_payload(data: Option<&Value>) -> Self {
        let field = |key: &str| -> Option<String> {
            match data?.get(key)? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        Self {
            failcode: field("failcodename")
                .or_else(|| field("failcode"))
                .unwrap_or_else(|| NONE.to_string()),
            erring_node: field("erring_node").unwrap_or_else(|| NONE.to_string()),
            erring_channel: field("erring_channel").unwrap_or_else(|| NONE.to_string()),
        }
    }

    pub fn unknown() -> Self {
        Self::from_payload(None)
    }

    /// Marks an attempt that stopped before `sendpay`.
    pub fn not_sent() -> Self {
        Self {
            failcode: NOT_SENT.to_string(),
            ..Self::unknown()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The payment settled. Cannot happen unless someone knew the preimage.
    Succeeded,
    NoRouteFound,
    RouteFailed(FailureDetail),
}

/// A single probe towards one destination.
///
/// An attempt starts out as [`ProbeOutcome::NoRouteFound`] with no route and
/// is filled in as the route lookup and the payment report back.
#[derive(Clone, Debug)]
pub struct ProbeAttempt {
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub amount_msat: u64,
    pub route: Option<Vec<RouteHop>>,
    pub payment_hash: Option<PaymentHash>,
    pub outcome: ProbeOutcome,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProbeAttempt {
    pub fn new(destination: impl Into<String>, amount_msat: u64) -> Self {
        Self {
            destination: destination.into(),
            started_at: Utc::now(),
            amount_msat,
            route: None,
            payment_hash: None,
            outcome: ProbeOutcome::NoRouteFound,
            finished_at: None,
        }
    }

    pub(crate) fn finish(&mut self, outcome: ProbeOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    /// Flattens the attempt into the row layout of the outcome table.
    pub fn to_record(&self) -> Result<ProbeRecord, serde_json::Error> {
        let time = utils::format_timestamp(&self.started_at);
        let route = match &self.route {
            Some(route) => serde_json::to_string(route)?,
            None => NONE.to_string(),
        };

        let record = match &self.outcome {
            ProbeOutcome::NoRouteFound => ProbeRecord {
                dest: self.destination.clone(),
                failcode: NO_ROUTE.to_string(),
                erring_node: NONE.to_string(),
                erring_channel: NONE.to_string(),
                route: NONE.to_string(),
                time,
                amount: NONE.to_string(),
            },
            ProbeOutcome::RouteFailed(failure) => ProbeRecord {
                dest: self.destination.clone(),
                failcode: failure.failcode.clone(),
                erring_node: failure.erring_node.clone(),
                erring_channel: failure.erring_channel.clone(),
                route,
                time,
                amount: self.amount_msat.to_string(),
            },
            ProbeOutcome::Succeeded => ProbeRecord {
                dest: self.destination.clone(),
                failcode: SUCCEEDED.to_string(),
                erring_node: NONE.to_string(),
                erring_channel: NONE.to_string(),
                route,
                time,
                amount: self.amount_msat.to_string(),
            },
        };

        Ok(record)
    }
}

/// One row of the outcome table, minus the serial id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub dest: String,
    pub failcode: String,
    pub erring_node: String,
    pub erring_channel: String,
    pub route: String,
    pub time: String,
    pub amount: String,
}
