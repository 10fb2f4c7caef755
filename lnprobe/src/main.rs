mod config;

use crate::config::Config;
use clap::Parser;
use lnprobe_core::recorder::OutcomeRecorder;
use lnprobe_core::{
    ClnRpc, ElectrumCli, HttpHeightOracle, MemoryRecorder, PostgresRecorder, ProbeConfig,
    RunOutcome, Sweep, WalletCli,
};
use log::{info, LevelFilter};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config: Config = Config::parse();
    init_logging(config.verbose)?;

    let probe_config = ProbeConfig::load(&config.config, config.network()?)?;
    info!("Network: {}", probe_config.network);
    info!("RPC path: {}", probe_config.rpc_path.display());
    info!("Table name: {}", probe_config.table_name);
    info!("Run full probe: {}", probe_config.run_full_probe);
    info!("Probing value: {} msat", probe_config.probing_value_msat);

    let rpc = Arc::new(ClnRpc::new(probe_config.rpc_path.clone()));
    let oracle = Arc::new(HttpHeightOracle::new(probe_config.oracle_url.clone())?);
    let wallet = ElectrumCli::new(
        probe_config.wallet_command.clone(),
        probe_config.is_testnet(),
    );

    let sweep = Sweep::new(probe_config, rpc);
    let wallet: Option<&dyn WalletCli> = if config.dry_run {
        None
    } else {
        Some(&wallet)
    };
    sweep.prepare(wallet, oracle).await?;

    let recorder: Arc<dyn OutcomeRecorder> = if config.dry_run {
        info!("Dry run, keeping outcomes in memory");
        Arc::new(MemoryRecorder::new())
    } else {
        let probe_config = sweep.config();
        Arc::new(
            PostgresRecorder::connect(&probe_config.database, &probe_config.table_name).await?,
        )
    };

    match sweep.run(recorder).await? {
        RunOutcome::Probed(summary) => info!(
            "Probed {} nodes: {} without route, {} failed along the route, {} rows lost",
            summary.attempted, summary.no_route, summary.route_failed, summary.persist_failures
        ),
        RunOutcome::Withdrew(withdraw) => info!("Withdrew in {}", withdraw.txid),
        RunOutcome::Idle => info!("Nothing to do"),
    }

    info!("Finished");
    Ok(())
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) if verbose => builder.filter_level(LevelFilter::Debug),
        Err(_) => builder.filter_level(LevelFilter::Info),
    };
    builder.try_init()?;
    Ok(())
}
