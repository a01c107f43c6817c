//! Swap workload: agents trade against a liquidity pool.

use alloy_primitives::{address, Address, U256};
use std::sync::Arc;
use tracing::info;

use super::{AgentPool, BatchSettings, ExecutionResult};
use crate::{
    error::BatchError,
    ledger::{fee, LedgerClient, TransferRequest},
    workload::WorkloadDescriptor,
    Account,
};

/// Pool address swaps are sent to unless overridden.
pub const DEFAULT_POOL: Address = address!("0x00000000000000000000000000000000000051a9");

/// Gas limit of one swap.
pub const SWAP_GAS_LIMIT: u64 = 150_000;

/// Native value put into the pool by one swap (0.0005 ETH).
pub const SWAP_VALUE: U256 = U256::from_limbs([500_000_000_000_000, 0, 0, 0]);

/// What one agent needs to perform `swaps` swaps.
pub fn per_transfer_cost(swaps: usize) -> U256 {
    U256::from(swaps) * (fee(SWAP_GAS_LIMIT) + SWAP_VALUE)
}

/// Agents that each perform `transfers_per_agent` swaps into the pool.
pub struct SwapBatch<L> {
    ledger: Arc<L>,
    process: Account,
    workload: WorkloadDescriptor,
    settings: BatchSettings,
}

impl<L: LedgerClient + 'static> SwapBatch<L> {
    /// Creates a new swap batch.
    pub fn new(
        ledger: Arc<L>,
        process: Account,
        workload: WorkloadDescriptor,
        settings: BatchSettings,
    ) -> Self {
        Self { ledger, process, workload, settings }
    }

    /// Funds the agents, runs their swaps, and sweeps them.
    pub async fn run(&mut self) -> Result<ExecutionResult, BatchError> {
        let swaps = self.workload.transfers_per_agent;
        let mut pool = AgentPool::create(
            self.ledger.clone(),
            self.process.clone(),
            self.workload.agent_count,
            &self.settings,
        )
        .await?;
        pool.fund(per_transfer_cost(swaps)).await?;

        let swap =
            TransferRequest::native(self.settings.pool, SWAP_VALUE).with_gas_limit(SWAP_GAS_LIMIT);
        let plans = (0..self.workload.agent_count).map(|_| vec![swap; swaps]).collect();

        let outcome = pool.run(plans).await;
        pool.sweep().await?;
        let result = outcome?;

        info!(
            agents = self.workload.agent_count,
            pool = %self.settings.pool,
            successful = result.successful,
            failed = result.failed,
            "swap batch finished"
        );
        Ok(result)
    }
}
