//! Vault workload: one manual payment, then a deposit per agent.

use alloy_primitives::{address, Address, U256};
use std::sync::Arc;
use tracing::{info, warn};

use super::{AgentPool, BatchSettings, ExecutionResult};
use crate::{
    error::BatchError,
    ledger::{fee, LedgerClient, TransferRequest, TRANSFER_GAS_LIMIT},
    workload::WorkloadDescriptor,
    Account,
};

/// Vault address deposits are sent to unless overridden.
pub const DEFAULT_VAULT: Address = address!("0x0000000000000000000000000000000000007a17");

/// Gas limit of one vault deposit.
pub const VAULT_GAS_LIMIT: u64 = 250_000;

/// Value of one vault deposit (0.01 ETH).
pub const VAULT_DEPOSIT_VALUE: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

/// Value of the manual payment made once per batch (0.01 ETH).
pub const MANUAL_PAYMENT_VALUE: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

/// What one agent needs for its deposit.
pub fn fixed_vault_cost() -> U256 {
    fee(VAULT_GAS_LIMIT) + VAULT_DEPOSIT_VALUE
}

/// What the process account spends on the manual payment.
pub fn fixed_manual_payment_cost() -> U256 {
    fee(TRANSFER_GAS_LIMIT) + MANUAL_PAYMENT_VALUE
}

/// Agents that each make a single vault deposit after the process account
/// has made the manual payment.
pub struct VaultBatch<L> {
    ledger: Arc<L>,
    process: Account,
    workload: WorkloadDescriptor,
    settings: BatchSettings,
}

impl<L: LedgerClient + 'static> VaultBatch<L> {
    /// Creates a new vault batch.
    pub fn new(
        ledger: Arc<L>,
        process: Account,
        workload: WorkloadDescriptor,
        settings: BatchSettings,
    ) -> Self {
        Self { ledger, process, workload, settings }
    }

    /// Makes the manual payment, funds the agents, runs their deposits, and
    /// sweeps them.
    pub async fn run(&mut self) -> Result<ExecutionResult, BatchError> {
        let mut pool = AgentPool::create(
            self.ledger.clone(),
            self.process.clone(),
            self.workload.agent_count,
            &self.settings,
        )
        .await?;

        let manual = pool
            .ledger()
            .transfer(pool.process(), self.settings.vault, MANUAL_PAYMENT_VALUE)
            .await?;
        if !pool.ledger().await_receipt(&manual).await?.status {
            warn!(tx_hash = %manual.hash, "manual vault payment failed");
        }

        pool.fund(fixed_vault_cost()).await?;

        let deposit = TransferRequest::native(self.settings.vault, VAULT_DEPOSIT_VALUE)
            .with_gas_limit(VAULT_GAS_LIMIT);
        let plans = (0..self.workload.agent_count).map(|_| vec![deposit]).collect();

        let outcome = pool.run(plans).await;
        pool.sweep().await?;
        let result = outcome?;

        info!(
            agents = self.workload.agent_count,
            vault = %self.settings.vault,
            successful = result.successful,
            failed = result.failed,
            "vault batch finished"
        );
        Ok(result)
    }
}
