use crate::catalog::NodeCatalog;
use crate::error::{ProbeError, RpcError, ROUTE_NOT_FOUND_CODE};
use crate::probe::{FailureDetail, PaymentHash, ProbeAttempt, ProbeOutcome};
use crate::recorder::OutcomeRecorder;
use crate::rpc::{LightningRpc, RouteHop, SendPay};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// `getroute` risk factor used for every probe.
pub const PROBE_RISK_FACTOR: u64 = 1;

/// Counts of what a sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub attempted: usize,
    pub no_route: usize,
    pub route_failed: usize,
    pub succeeded: usize,
    pub persist_failures: usize,
    pub skipped_self: usize,
}

impl SweepSummary {
    fn tally(&mut self, outcome: &ProbeOutcome) {
        self.attempted += 1;
        match outcome {
            ProbeOutcome::Succeeded => self.succeeded += 1,
            ProbeOutcome::NoRouteFound => self.no_route += 1,
            ProbeOutcome::RouteFailed(_) => self.route_failed += 1,
        }
    }
}

/// Sends unfulfillable payments to each node and records where they die.
///
/// Probes run one at a time.
pub struct RouteProber {
    rpc: Arc<dyn LightningRpc>,
    recorder: Arc<dyn OutcomeRecorder>,
    probing_value_msat: u64,
    payment_hash: fn() -> Result<PaymentHash, getrandom::Error>,
}

impl RouteProber {
    pub fn new(
        rpc: Arc<dyn LightningRpc>,
        recorder: Arc<dyn OutcomeRecorder>,
        probing_value_msat: u64,
    ) -> Self {
        Self {
            rpc,
            recorder,
            probing_value_msat,
            payment_hash: PaymentHash::random,
        }
    }

    #[cfg(test)]
    fn with_payment_hash(mut self, source: fn() -> Result<PaymentHash, getrandom::Error>) -> Self {
        self.payment_hash = source;
        self
    }

    /// Probes every catalog node except ourselves and records one row each.
    ///
    /// Nothing that happens to a single destination stops the sweep.
    pub async fn sweep(&self, catalog: &NodeCatalog) -> SweepSummary {
        let mut summary = SweepSummary::default();
        if catalog.is_empty() {
            warn!("Node catalog is empty, nothing to probe");
            return summary;
        }

        let total = catalog.destinations().count();
        summary.skipped_self = catalog.len() - total;
        info!(
            "Going through {total} nodes, skipping ourselves ({})",
            catalog.self_id()
        );

        for (index, destination) in catalog.destinations().enumerate() {
            debug!("Counter: {}/{total} {destination}", index + 1);

            let attempt = self.probe(destination).await;
            summary.tally(&attempt.outcome);

            if let Err(e) = self.recorder.record(attempt).await {
                let e = ProbeError::from(e);
                error!("Unable to record probe to {destination}: {e}");
                summary.persist_failures += 1;
            }
        }

        info!("Sweep finished: {summary:?}");
        summary
    }

    /// Runs a single probe. Never fails; failures end up in the outcome.
    pub async fn probe(&self, destination: &str) -> ProbeAttempt {
        let mut attempt = ProbeAttempt::new(destination, self.probing_value_msat);

        let route = match self.find_route(destination).await {
            Ok(route) => route,
            Err(e) => {
                info!("{e}");
                attempt.finish(ProbeOutcome::NoRouteFound);
                return attempt;
            }
        };
        debug!("Found route to {destination} with {} hops", route.len());
        attempt.route = Some(route.clone());

        let payment_hash = match (self.payment_hash)() {
            Ok(hash) => hash,
            Err(e) => {
                error!("No payment sent to {destination}, failed to generate payment hash: {e}");
                attempt.finish(ProbeOutcome::RouteFailed(FailureDetail::not_sent()));
                return attempt;
            }
        };
        attempt.payment_hash = Some(payment_hash);

        match self.dispatch(&route, &payment_hash).await {
            Ok(result) => {
                warn!(
                    "Probe {} to {destination} completed with status {}",
                    result.payment_hash, result.status
                );
                attempt.finish(ProbeOutcome::Succeeded);
            }
            Err(ProbeError::PaymentDispatchFailed { failure }) => {
                info!(
                    "Probe to {destination} failed with {} at {}",
                    failure.failcode, failure.erring_node
                );
                attempt.finish(ProbeOutcome::RouteFailed(failure));
            }
            Err(e) => {
                error!("Probe to {destination} failed unexpectedly: {e}");
                attempt.finish(ProbeOutcome::RouteFailed(FailureDetail::unknown()));
            }
        }

        attempt
    }

    async fn find_route(&self, destination: &str) -> Result<Vec<RouteHop>, ProbeError> {
        let result = self
            .rpc
            .getroute(destination, self.probing_value_msat, PROBE_RISK_FACTOR)
            .await;

        match result {
            Ok(found) if !found.route.is_empty() => Ok(found.route),
            Ok(_) => Err(ProbeError::RouteNotFound {
                destination: destination.to_string(),
                source: RpcError::Server {
                    code: ROUTE_NOT_FOUND_CODE,
                    message: "empty route".to_string(),
                    data: None,
                },
            }),
            Err(source) => Err(ProbeError::RouteNotFound {
                destination: destination.to_string(),
                source,
            }),
        }
    }

    /// Sends along `route` and waits for the payment to resolve.
    async fn dispatch(
        &self,
        route: &[RouteHop],
        payment_hash: &PaymentHash,
    ) -> Result<SendPay, ProbeError> {
        debug!("Sending probe with payment hash {payment_hash}");
        self.rpc
            .sendpay(route, payment_hash)
            .await
            .map_err(dispatch_failed)?;

        debug!("Waiting for probe {payment_hash}");
        self.rpc
            .waitsendpay(payment_hash)
            .await
            .map_err(dispatch_failed)
    }
}

fn dispatch_failed(e: RpcError) -> ProbeError {
    debug!("Payment error: {e}");
    ProbeError::PaymentDispatchFailed {
        failure: FailureDetail::from_payload(e.data()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistError;
    use crate::probe::{NONE, NOT_SENT, NO_ROUTE};
    use crate::recorder::{MemoryRecorder, MockOutcomeRecorder};
    use crate::rpc::{GetRoute, MockLightningRpc, NodeEntry};
    use serde_json::json;

    fn node(id: &str) -> NodeEntry {
        NodeEntry {
            nodeid: id.to_string(),
            alias: None,
            last_timestamp: None,
        }
    }

    fn route_to(id: &str) -> GetRoute {
        GetRoute {
            route: vec![RouteHop {
                id: id.to_string(),
                channel: "812345x12x1".to_string(),
                direction: 0,
                amount_msat: 200_000_000,
                delay: 18,
                style: Some("tlv".to_string()),
            }],
        }
    }

    fn no_route() -> RpcError {
        RpcError::Server {
            code: ROUTE_NOT_FOUND_CODE,
            message: "Could not find a route".to_string(),
            data: None,
        }
    }

    fn unknown_next_peer() -> RpcError {
        RpcError::Server {
            code: 204,
            message: "failed: WIRE_UNKNOWN_NEXT_PEER (reply from remote)".to_string(),
            data: Some(json!({
                "failcode": 16394,
                "failcodename": "WIRE_UNKNOWN_NEXT_PEER",
                "erring_node": "03hop",
                "erring_channel": "700x1x0",
                "erring_index": 1,
            })),
        }
    }

    #[tokio::test]
    async fn scenario_self_a_b() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .withf(|id, amount, risk| id == "02a" && *amount == 200_000_000 && *risk == 1)
            .times(1)
            .returning(|_, _, _| Err(no_route()));
        rpc.expect_getroute()
            .withf(|id, amount, risk| id == "02b" && *amount == 200_000_000 && *risk == 1)
            .times(1)
            .returning(|id, _, _| Ok(route_to(id)));
        rpc.expect_sendpay().times(1).returning(|_, hash| {
            Ok(SendPay {
                payment_hash: hash.to_string(),
                status: "pending".to_string(),
                id: Some(1),
            })
        });
        rpc.expect_waitsendpay()
            .times(1)
            .returning(|_| Err(unknown_next_peer()));

        let recorder = MemoryRecorder::new();
        let prober = RouteProber::new(Arc::new(rpc), Arc::new(recorder.clone()), 200_000_000);
        let catalog = NodeCatalog::new("02self", vec![node("02self"), node("02a"), node("02b")]);

        let summary = prober.sweep(&catalog).await;
        assert_eq!(
            summary,
            SweepSummary {
                attempted: 2,
                no_route: 1,
                route_failed: 1,
                succeeded: 0,
                persist_failures: 0,
                skipped_self: 1,
            }
        );

        let records = recorder.records().unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].dest, "02a");
        assert_eq!(records[0].failcode, NO_ROUTE);
        assert_eq!(records[0].erring_node, NONE);
        assert_eq!(records[0].erring_channel, NONE);
        assert_eq!(records[0].route, NONE);

        assert_eq!(records[1].dest, "02b");
        assert_eq!(records[1].failcode, "WIRE_UNKNOWN_NEXT_PEER");
        assert_eq!(records[1].erring_node, "03hop");
        assert_eq!(records[1].erring_channel, "700x1x0");
        assert_eq!(
            records[1].route,
            serde_json::to_string(&route_to("02b").route).unwrap()
        );
        assert_eq!(records[1].amount, "200000000");
    }

    #[tokio::test]
    async fn every_probe_uses_a_fresh_hash() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .returning(|id, _, _| Ok(route_to(id)));
        let sent = seen.clone();
        rpc.expect_sendpay().returning(move |_, hash| {
            sent.lock().unwrap().push(*hash);
            Ok(SendPay {
                payment_hash: hash.to_string(),
                status: "pending".to_string(),
                id: None,
            })
        });
        rpc.expect_waitsendpay()
            .returning(|_| Err(unknown_next_peer()));

        let prober = RouteProber::new(Arc::new(rpc), Arc::new(MemoryRecorder::new()), 1_000);
        let first = prober.probe("02a").await;
        let second = prober.probe("02a").await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
        assert_eq!(first.payment_hash, Some(seen[0]));
        assert_eq!(second.payment_hash, Some(seen[1]));
    }

    #[tokio::test]
    async fn failure_without_payload_uses_sentinels() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .returning(|id, _, _| Ok(route_to(id)));
        rpc.expect_sendpay().returning(|_, hash| {
            Ok(SendPay {
                payment_hash: hash.to_string(),
                status: "pending".to_string(),
                id: None,
            })
        });
        rpc.expect_waitsendpay()
            .returning(|_| Err(RpcError::InvalidResponse("socket closed".to_string())));

        let prober = RouteProber::new(Arc::new(rpc), Arc::new(MemoryRecorder::new()), 1_000);
        let attempt = prober.probe("02a").await;

        assert_eq!(attempt.outcome, ProbeOutcome::RouteFailed(FailureDetail::unknown()));
        assert!(attempt.route.is_some());
        assert!(attempt.finished_at.is_some());
    }

    #[tokio::test]
    async fn sendpay_failure_skips_wait() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .returning(|id, _, _| Ok(route_to(id)));
        rpc.expect_sendpay()
            .returning(|_, _| Err(unknown_next_peer()));
        rpc.expect_waitsendpay().never();

        let prober = RouteProber::new(Arc::new(rpc), Arc::new(MemoryRecorder::new()), 1_000);
        let attempt = prober.probe("02a").await;

        match attempt.outcome {
            ProbeOutcome::RouteFailed(failure) => {
                assert_eq!(failure.failcode, "WIRE_UNKNOWN_NEXT_PEER")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_route_counts_as_no_route() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .returning(|_, _, _| Ok(GetRoute { route: vec![] }));
        rpc.expect_sendpay().never();

        let prober = RouteProber::new(Arc::new(rpc), Arc::new(MemoryRecorder::new()), 1_000);
        let attempt = prober.probe("02a").await;

        assert_eq!(attempt.outcome, ProbeOutcome::NoRouteFound);
        assert_eq!(attempt.payment_hash, None);
    }

    #[tokio::test]
    async fn hash_failure_is_marked_not_sent() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .returning(|id, _, _| Ok(route_to(id)));
        rpc.expect_sendpay().never();
        rpc.expect_waitsendpay().never();

        let recorder = MemoryRecorder::new();
        let prober = RouteProber::new(Arc::new(rpc), Arc::new(recorder.clone()), 1_000)
            .with_payment_hash(|| Err(getrandom::Error::UNSUPPORTED));
        let catalog = NodeCatalog::new("02self", vec![node("02a")]);

        let summary = prober.sweep(&catalog).await;
        assert_eq!(summary.route_failed, 1);

        let records = recorder.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failcode, NOT_SENT);
        assert_eq!(records[0].erring_node, NONE);
        assert_eq!(records[0].erring_channel, NONE);
    }

    #[tokio::test]
    async fn empty_catalog_probes_nothing() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute().never();

        let prober = RouteProber::new(Arc::new(rpc), Arc::new(MemoryRecorder::new()), 1_000);
        let summary = prober.sweep(&NodeCatalog::new("02self", vec![])).await;
        assert_eq!(summary, SweepSummary::default());
    }

    #[test]
    fn persistence_failure_keeps_its_cause() {
        let e = ProbeError::from(PersistError::LockError);
        assert!(matches!(
            e,
            ProbeError::PersistenceFailed {
                source: PersistError::LockError
            }
        ));
        assert_eq!(
            e.to_string(),
            "Failed to persist probe outcome: Failed to get lock on memory storage"
        );
    }

    #[tokio::test]
    async fn persistence_failures_do_not_stop_the_sweep() {
        let mut rpc = MockLightningRpc::new();
        rpc.expect_getroute()
            .times(3)
            .returning(|_, _, _| Err(no_route()));

        let mut recorder = MockOutcomeRecorder::new();
        recorder
            .expect_record()
            .times(3)
            .returning(|_| Err(PersistError::LockError));

        let prober = RouteProber::new(Arc::new(rpc), Arc::new(recorder), 1_000);
        let catalog = NodeCatalog::new("02self", vec![node("02a"), node("02b"), node("02c")]);

        let summary = prober.sweep(&catalog).await;
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.persist_failures, 3);
    }
}
