//! Command-line configuration.

use alloy_primitives::{B256, U256};
use clap::{ArgAction, Parser};
use std::time::Duration;

use crate::{
    accounts::AccountSource,
    agents::BatchSettings,
    clock::Sleeper,
    driver::{DriverConfig, LoopBound},
    error::HarnessError,
    funding::FundingGuard,
    ledger::{AssetId, LedgerConfig},
    workload::{WorkloadDescriptor, WorkloadKind},
};

/// Funded load generator for the in-process ledger.
#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Hex secret of the funding source account. Uses the ledger's host
    /// account when absent.
    #[arg(long, env = "LOADGEN_FUNDING_KEY", hide_env_values = true)]
    pub funding_key: Option<B256>,

    /// Workload kind: payment, uniswap-swap or element-vault.
    #[arg(long, default_value = "payment")]
    pub workload: String,

    /// Agents per batch.
    #[arg(long, default_value_t = 10)]
    pub agents: usize,

    /// Transfers each agent makes per batch.
    #[arg(long, default_value_t = 5)]
    pub transfers_per_agent: usize,

    /// Asset ids the workload transacts in.
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pub asset_ids: Vec<AssetId>,

    /// Number of iterations. Runs until interrupted when absent.
    #[arg(long)]
    pub loops: Option<u64>,

    /// Maximum number of agents running at once.
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,

    /// Blocks a transfer needs before its receipt is returned.
    #[arg(long, default_value_t = 1)]
    pub confirmations: u64,

    /// Balance left in the process account at teardown, in wei.
    #[arg(long)]
    pub refund_reserve: Option<U256>,

    /// Seconds to wait between failed funding attempts.
    #[arg(long, default_value_t = 5)]
    pub backoff_secs: u64,

    /// Seconds to wait for a funding receipt.
    #[arg(long, default_value_t = 60)]
    pub receipt_timeout_secs: u64,

    /// Genesis balance of the ledger's host account, in wei.
    #[arg(long)]
    pub genesis_balance: Option<U256>,

    /// Increase logging verbosity (1=ERROR, 2=WARN, 3=INFO, 4=DEBUG, 5=TRACE).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, default_value = "3")]
    pub verbosity: u8,
}

impl Cli {
    /// The workload this process runs.
    pub fn workload(&self) -> Result<WorkloadDescriptor, HarnessError> {
        let kind: WorkloadKind = self.workload.parse()?;
        Ok(kind.describe(self.agents, self.transfers_per_agent, self.asset_ids.clone()))
    }

    /// The iteration bound.
    pub fn bound(&self) -> LoopBound {
        self.loops.into()
    }

    /// Where the funding source comes from.
    pub fn account_source(&self) -> AccountSource {
        self.funding_key.into()
    }

    /// Configuration of the in-process ledger.
    pub fn ledger_config(&self) -> LedgerConfig {
        let config = LedgerConfig::default().with_confirmations(self.confirmations);
        match self.genesis_balance {
            Some(balance) => config.with_genesis_balance(balance),
            None => config,
        }
    }

    /// Settings shared by every agent batch.
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings::default().with_concurrency(self.concurrency)
    }

    /// Run driver settings.
    pub fn driver_config(&self) -> DriverConfig {
        let config = DriverConfig::default().with_bound(self.bound());
        match self.refund_reserve {
            Some(reserve) => config.with_refund_reserve(reserve),
            None => config,
        }
    }

    /// Applies the backoff and receipt timeout to `guard`.
    pub fn configure_guard<S: Sleeper>(&self, guard: FundingGuard<S>) -> FundingGuard<S> {
        guard
            .with_backoff(Duration::from_secs(self.backoff_secs))
            .with_receipt_timeout(Duration::from_secs(self.receipt_timeout_secs))
    }
}
