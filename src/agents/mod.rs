//! Workload agent batches.
//!
//! This module provides the [`AgentBatchExecutor`] trait, the closed
//! [`AgentBatch`] enum over the supported workload kinds, and the agent pool
//! every kind runs its agents through.

pub mod payment;
pub mod swap;
pub mod vault;

pub use payment::PaymentBatch;
pub use swap::SwapBatch;
pub use vault::VaultBatch;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, warn};

use crate::{
    error::{BatchError, LedgerError},
    ledger::{fee, LedgerClient, TransferRequest, NATIVE_ASSET, TRANSFER_GAS_LIMIT},
    workload::{WorkloadDescriptor, WorkloadKind},
    Account,
};

/// Result of running one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Number of agent transfers that succeeded.
    pub successful: usize,
    /// Number of agent transfers that failed or were never attempted.
    pub failed: usize,
}

impl ExecutionResult {
    /// Creates a new execution result.
    pub fn new(successful: usize, failed: usize) -> Self {
        Self { successful, failed }
    }

    fn merge(&mut self, other: ExecutionResult) {
        self.successful += other.successful;
        self.failed += other.failed;
    }
}

/// Knobs shared by every batch kind.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Maximum number of agents running at once.
    pub concurrency: usize,
    /// Address swaps are sent to.
    pub pool: Address,
    /// Address vault deposits are sent to.
    pub vault: Address,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { concurrency: 16, pool: swap::DEFAULT_POOL, vault: vault::DEFAULT_VAULT }
    }
}

impl BatchSettings {
    /// Sets the agent concurrency limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// One batch of agents executing a workload against the ledger.
#[async_trait]
pub trait AgentBatchExecutor: Send {
    /// Runs every agent to completion.
    async fn run(&mut self) -> Result<ExecutionResult, BatchError>;

    /// Returns a human-readable name for this batch kind.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// A batch of one of the supported workload kinds.
pub enum AgentBatch<L> {
    /// See [`PaymentBatch`].
    Payment(PaymentBatch<L>),
    /// See [`SwapBatch`].
    UniswapSwap(SwapBatch<L>),
    /// See [`VaultBatch`].
    ElementVault(VaultBatch<L>),
}

impl<L: LedgerClient + 'static> AgentBatch<L> {
    /// Builds the batch matching `workload.kind`, bound to the process account.
    pub fn new(
        ledger: Arc<L>,
        process: Account,
        workload: &WorkloadDescriptor,
        settings: BatchSettings,
    ) -> Self {
        match workload.kind {
            WorkloadKind::Payment => {
                Self::Payment(PaymentBatch::new(ledger, process, workload.clone(), settings))
            }
            WorkloadKind::UniswapSwap => {
                Self::UniswapSwap(SwapBatch::new(ledger, process, workload.clone(), settings))
            }
            WorkloadKind::ElementVault => {
                Self::ElementVault(VaultBatch::new(ledger, process, workload.clone(), settings))
            }
        }
    }
}

#[async_trait]
impl<L: LedgerClient + 'static> AgentBatchExecutor for AgentBatch<L> {
    async fn run(&mut self) -> Result<ExecutionResult, BatchError> {
        match self {
            Self::Payment(batch) => batch.run().await,
            Self::UniswapSwap(batch) => batch.run().await,
            Self::ElementVault(batch) => batch.run().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Payment(_) => "payment",
            Self::UniswapSwap(_) => "uniswap-swap",
            Self::ElementVault(_) => "element-vault",
        }
    }
}

/// Builds the batch the run driver executes each iteration.
pub trait BatchFactory<L>: Send + Sync {
    /// The batch type produced.
    type Batch: AgentBatchExecutor;

    /// Builds the batch for iteration `index`.
    fn build(
        &self,
        ledger: Arc<L>,
        process: &Account,
        workload: &WorkloadDescriptor,
        index: u64,
    ) -> Self::Batch;
}

/// Factory that picks the batch from the workload kind.
#[derive(Debug, Clone, Default)]
pub struct KindDispatch {
    /// Settings handed to every batch.
    pub settings: BatchSettings,
}

impl KindDispatch {
    /// Creates a factory using `settings`.
    pub fn new(settings: BatchSettings) -> Self {
        Self { settings }
    }
}

impl<L: LedgerClient + 'static> BatchFactory<L> for KindDispatch {
    type Batch = AgentBatch<L>;

    fn build(
        &self,
        ledger: Arc<L>,
        process: &Account,
        workload: &WorkloadDescriptor,
        _index: u64,
    ) -> Self::Batch {
        AgentBatch::new(ledger, process.clone(), workload, self.settings.clone())
    }
}

// ============================================================================
// Agent Pool
// ============================================================================

/// Agents created for one batch, funded from and swept back to the process
/// account.
pub(crate) struct AgentPool<L> {
    ledger: Arc<L>,
    process: Account,
    agents: Vec<Account>,
    funded: Vec<bool>,
    concurrency: usize,
}

impl<L: LedgerClient + 'static> AgentPool<L> {
    /// Registers `count` fresh agent accounts with the ledger.
    pub(crate) async fn create(
        ledger: Arc<L>,
        process: Account,
        count: usize,
        settings: &BatchSettings,
    ) -> Result<Self, BatchError> {
        let mut agents = Vec::with_capacity(count);
        for _ in 0..count {
            agents.push(ledger.create_account(Account::random().secret()).await?);
        }

        Ok(Self {
            ledger,
            process,
            funded: vec![false; agents.len()],
            agents,
            concurrency: settings.concurrency.max(1),
        })
    }

    pub(crate) fn addresses(&self) -> Vec<Address> {
        self.agents.iter().map(|agent| agent.address).collect()
    }

    pub(crate) fn process(&self) -> &Account {
        &self.process
    }

    pub(crate) fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Sends `allowance` from the process account to every agent.
    ///
    /// Agents whose funding transfer fails are left out of [`Self::run`].
    pub(crate) async fn fund(&mut self, allowance: U256) -> Result<(), BatchError> {
        let mut handles = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let handle = self.ledger.transfer(&self.process, agent.address, allowance).await?;
            handles.push(handle);
        }

        for (index, handle) in handles.iter().enumerate() {
            let receipt = self.ledger.await_receipt(handle).await?;
            self.funded[index] = receipt.status;
            if !receipt.status {
                warn!(
                    agent = %self.agents[index].address,
                    tx_hash = %handle.hash,
                    "agent funding failed"
                );
            }
        }
        Ok(())
    }

    /// Runs every funded agent's transfers, at most `concurrency` agents at a
    /// time. Each agent submits its transfers one after another.
    ///
    /// An agent error does not stop the others; every agent runs to the end
    /// and the first error is returned afterwards.
    pub(crate) async fn run(
        &self,
        plans: Vec<Vec<TransferRequest>>,
    ) -> Result<ExecutionResult, BatchError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut result = ExecutionResult::default();

        for ((agent, plan), funded) in self.agents.iter().zip(plans).zip(&self.funded) {
            if !*funded {
                result.failed += plan.len();
                continue;
            }

            let ledger = self.ledger.clone();
            let agent = agent.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| LedgerError::Rejected(e.to_string()))?;
                run_agent(ledger.as_ref(), &agent, plan).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let agent_result = joined
                .map_err(|e| BatchError::AgentPanicked(e.to_string()))
                .and_then(|r| r.map_err(BatchError::from));
            match agent_result {
                Ok(agent_result) => result.merge(agent_result),
                Err(e) => {
                    warn!(error = %e, "agent failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Returns each agent's leftover native balance, minus the sweep fee, to
    /// the process account. Sweep failures are logged and skipped.
    pub(crate) async fn sweep(&self) -> Result<U256, BatchError> {
        let sweep_fee = fee(TRANSFER_GAS_LIMIT);
        let mut handles = Vec::new();

        for agent in &self.agents {
            let balance = self.ledger.get_balance(NATIVE_ASSET, agent.address).await?;
            if balance <= sweep_fee {
                continue;
            }
            let value = balance - sweep_fee;
            let handle = self.ledger.transfer(agent, self.process.address, value).await?;
            handles.push((handle, value));
        }

        let mut swept = U256::ZERO;
        for (handle, value) in handles {
            match self.ledger.await_receipt(&handle).await {
                Ok(receipt) if receipt.status => swept += value,
                Ok(_) => warn!(tx_hash = %handle.hash, "agent sweep reverted"),
                Err(e) => warn!(tx_hash = %handle.hash, error = %e, "agent sweep failed"),
            }
        }

        debug!(agents = self.agents.len(), %swept, "swept agent balances");
        Ok(swept)
    }
}

async fn run_agent<L: LedgerClient + ?Sized>(
    ledger: &L,
    agent: &Account,
    plan: Vec<TransferRequest>,
) -> Result<ExecutionResult, LedgerError> {
    let mut result = ExecutionResult::default();
    for request in plan {
        let handle = ledger.submit(agent, request).await?;
        if ledger.await_receipt(&handle).await?.status {
            result.successful += 1;
        } else {
            result.failed += 1;
        }
    }
    Ok(result)
}
