//! Payment workload: agents pay each other in a ring.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use tracing::info;

use super::{AgentPool, BatchSettings, ExecutionResult};
use crate::{
    error::BatchError,
    ledger::{fee, AssetId, LedgerClient, TransferRequest, NATIVE_ASSET, TRANSFER_GAS_LIMIT},
    workload::WorkloadDescriptor,
    Account,
};

/// Value of a single payment (0.001 ETH).
pub const PAYMENT_VALUE: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

/// Gas limit of a token payment.
pub const TOKEN_TRANSFER_GAS_LIMIT: u64 = 65_000;

/// What one agent needs to issue `transfers` payments in `asset`.
///
/// Native payments carry value and pay the transfer fee; token payments only
/// pay gas in the native asset.
pub fn per_transfer_cost(asset: AssetId, transfers: usize) -> U256 {
    let transfers = U256::from(transfers);
    if asset == NATIVE_ASSET {
        transfers * (fee(TRANSFER_GAS_LIMIT) + PAYMENT_VALUE)
    } else {
        transfers * fee(TOKEN_TRANSFER_GAS_LIMIT)
    }
}

/// Agents that each make `transfers_per_agent` payments to the next agent.
///
/// A lone agent pays the process account instead.
pub struct PaymentBatch<L> {
    ledger: Arc<L>,
    process: Account,
    workload: WorkloadDescriptor,
    settings: BatchSettings,
}

impl<L: LedgerClient + 'static> PaymentBatch<L> {
    /// Creates a new payment batch.
    pub fn new(
        ledger: Arc<L>,
        process: Account,
        workload: WorkloadDescriptor,
        settings: BatchSettings,
    ) -> Self {
        Self { ledger, process, workload, settings }
    }

    /// Funds the agents, runs their payments, and sweeps them.
    pub async fn run(&mut self) -> Result<ExecutionResult, BatchError> {
        let asset = self.workload.primary_asset().unwrap_or(NATIVE_ASSET);
        if asset != NATIVE_ASSET {
            return Err(BatchError::UnsupportedAsset(asset));
        }

        let transfers = self.workload.transfers_per_agent;
        let mut pool = AgentPool::create(
            self.ledger.clone(),
            self.process.clone(),
            self.workload.agent_count,
            &self.settings,
        )
        .await?;
        pool.fund(per_transfer_cost(asset, transfers)).await?;

        let recipients = ring_recipients(&pool.addresses(), pool.process().address);
        let plans = recipients
            .into_iter()
            .map(|to| vec![TransferRequest::native(to, PAYMENT_VALUE); transfers])
            .collect();

        // Sweep even when an agent failed, then report the failure.
        let outcome = pool.run(plans).await;
        pool.sweep().await?;
        let result = outcome?;

        info!(
            agents = self.workload.agent_count,
            successful = result.successful,
            failed = result.failed,
            "payment batch finished"
        );
        Ok(result)
    }
}

/// Agent `i` pays agent `i + 1`; the last agent wraps to the first.
fn ring_recipients(agents: &[Address], fallback: Address) -> Vec<Address> {
    match agents.len() {
        0 => Vec::new(),
        1 => vec![fallback],
        n => (0..n).map(|i| agents[(i + 1) % n]).collect(),
    }
}
