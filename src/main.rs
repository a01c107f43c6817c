//! CLI for running a funded load test against the in-process ledger.

use clap::Parser;
use eyre::WrapErr;
use ledger_loadgen::{
    accounts::provision_process_account,
    clock::TokioSleeper,
    config::Cli,
    telemetry::init_tracing,
    FundingGuard, InMemoryLedger, KindDispatch, RunDriver,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity)?;

    // Unknown workload kinds fail here, before any ledger I/O.
    let workload = cli.workload().wrap_err("invalid workload")?;
    let ledger = Arc::new(InMemoryLedger::new(cli.ledger_config()));

    let source = cli
        .account_source()
        .resolve(ledger.as_ref())
        .await
        .wrap_err("failed to resolve funding source")?;
    let process = provision_process_account(ledger.as_ref())
        .await
        .wrap_err("failed to provision process account")?;

    info!(
        workload = %workload.kind,
        agents = workload.agent_count,
        transfers_per_agent = workload.transfers_per_agent,
        loops = ?cli.loops,
        "starting load test"
    );

    let cancel = CancellationToken::new();
    let driver = RunDriver::new(
        ledger,
        source,
        process,
        workload,
        KindDispatch::new(cli.batch_settings()),
        cli.configure_guard(FundingGuard::new(TokioSleeper)),
        cli.driver_config(),
    )
    .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after the current iteration");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });

    let summary = driver.run().await.wrap_err("load test failed")?;

    println!(
        "{} iterations{} | refunded {}",
        summary.iterations,
        if summary.cancelled { " (cancelled)" } else { "" },
        summary.refund.map(|r| r.refunded()).unwrap_or_default()
    );
    Ok(())
}
