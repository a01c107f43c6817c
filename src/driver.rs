//! Run driver.
//!
//! Runs the labeled iterations of a process one after another. Every
//! iteration recomputes the funding budget, makes sure the process account
//! holds it, and then runs one agent batch to completion:
//!
//! ```text
//! ComputeBudget -> EnsureFunded -> ExecuteBatch -> RecordTiming -> next | stop
//! ```
//!
//! Once the loop stops, for whatever reason, the residual balance is refunded
//! to the funding source and the ledger session is closed.

use alloy_primitives::U256;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    agents::{AgentBatchExecutor, BatchFactory, ExecutionResult},
    budget::{self, FundingSpec},
    clock::{Sleeper, TokioSleeper},
    error::HarnessError,
    funding::{FundingGuard, FundingReport},
    ledger::{fee, LedgerClient, TRANSFER_GAS_LIMIT},
    refund::{self, RefundOutcome},
    workload::WorkloadDescriptor,
    Account,
};

/// How many iterations a run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopBound {
    /// Exactly this many iterations.
    Fixed(u64),
    /// Iterate until cancelled.
    #[default]
    Unbounded,
}

impl LoopBound {
    /// Loop count the budget is padded for. An unbounded run budgets for one.
    pub fn budget_loops(&self) -> u64 {
        match self {
            Self::Fixed(n) => *n,
            Self::Unbounded => 1,
        }
    }

    fn allows(&self, index: u64) -> bool {
        match self {
            Self::Fixed(n) => index < *n,
            Self::Unbounded => true,
        }
    }
}

impl From<Option<u64>> for LoopBound {
    fn from(loops: Option<u64>) -> Self {
        loops.map_or(Self::Unbounded, Self::Fixed)
    }
}

/// Settings for a [`RunDriver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Iteration bound.
    pub bound: LoopBound,
    /// Balance left in the process account at teardown.
    pub refund_reserve: U256,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { bound: LoopBound::Unbounded, refund_reserve: fee(TRANSFER_GAS_LIMIT) }
    }
}

impl DriverConfig {
    /// Sets the iteration bound.
    pub fn with_bound(mut self, bound: LoopBound) -> Self {
        self.bound = bound;
        self
    }

    /// Sets the refund reserve.
    pub fn with_refund_reserve(mut self, reserve: U256) -> Self {
        self.refund_reserve = reserve;
        self
    }
}

/// Record of one finished iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunIteration {
    /// Zero-based iteration index.
    pub index: u64,
    /// When the iteration started.
    pub started_at: Instant,
    /// Budget the iteration was funded against.
    pub funding: FundingSpec,
    /// What the funding guard had to do.
    pub funding_report: FundingReport,
    /// Outcome of the batch.
    pub result: ExecutionResult,
    /// Wall-clock time of the whole iteration.
    pub elapsed: Duration,
}

/// Outcome of [`RunDriver::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations that ran to completion.
    pub iterations: u64,
    /// Whether the loop stopped because of cancellation.
    pub cancelled: bool,
    /// What the teardown refund did, if it got far enough to say.
    pub refund: Option<RefundOutcome>,
}

/// Drives the iterations of one process.
pub struct RunDriver<L, F, S = TokioSleeper> {
    ledger: Arc<L>,
    source: Account,
    process: Account,
    workload: WorkloadDescriptor,
    factory: F,
    guard: FundingGuard<S>,
    config: DriverConfig,
    cancel: CancellationToken,
}

impl<L, F, S> RunDriver<L, F, S>
where
    L: LedgerClient + 'static,
    F: BatchFactory<L>,
    S: Sleeper,
{
    /// Creates a driver funding `process` from `source`.
    pub fn new(
        ledger: Arc<L>,
        source: Account,
        process: Account,
        workload: WorkloadDescriptor,
        factory: F,
        guard: FundingGuard<S>,
        config: DriverConfig,
    ) -> Self {
        Self {
            ledger,
            source,
            process,
            workload,
            factory,
            guard,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to stop the run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every iteration, then refunds and closes the ledger session.
    ///
    /// The refund and close happen on every exit path. Their own failures are
    /// logged; the first iteration error, if any, is returned afterwards.
    pub async fn run(self) -> Result<RunSummary, HarnessError> {
        let mut iterations = 0;
        let outcome = self.run_iterations(&mut iterations).await;

        let refund = match refund::refund(
            self.ledger.as_ref(),
            &self.process,
            self.source.address,
            self.config.refund_reserve,
        )
        .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "refund failed");
                None
            }
        };

        if let Err(e) = self.ledger.close().await {
            warn!(error = %e, "failed to close ledger session");
        }

        let cancelled = outcome?;
        info!(iterations, cancelled, "run finished");
        Ok(RunSummary { iterations, cancelled, refund })
    }

    /// Runs iterations until the bound is reached or the run is cancelled.
    /// Returns whether it stopped because of cancellation.
    async fn run_iterations(&self, completed: &mut u64) -> Result<bool, HarnessError> {
        let mut index = 0;
        while self.config.bound.allows(index) {
            if self.cancel.is_cancelled() {
                info!(index, "run cancelled before iteration");
                return Ok(true);
            }

            match self.run_iteration(index).await {
                Ok(_) => {}
                Err(HarnessError::Cancelled) => {
                    info!(index, "run cancelled while funding");
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }

            *completed += 1;
            index += 1;
        }
        Ok(false)
    }

    /// Runs iteration `index`: budget, funding, batch.
    pub async fn run_iteration(&self, index: u64) -> Result<RunIteration, HarnessError> {
        let started_at = Instant::now();

        let funding = budget::estimate(&self.workload, self.config.bound.budget_loops())?;
        info!(
            index,
            threshold = %funding.threshold,
            top_up = %funding.top_up,
            "iteration starting"
        );

        let funding_report = self
            .guard
            .ensure_funded(
                self.ledger.as_ref(),
                &self.source,
                self.process.address,
                &funding,
                &self.cancel,
            )
            .await?;

        let mut batch =
            self.factory.build(self.ledger.clone(), &self.process, &self.workload, index);
        let result = batch.run().await?;

        let elapsed = started_at.elapsed();
        info!(
            index,
            batch = batch.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            successful = result.successful,
            failed = result.failed,
            "iteration finished"
        );

        Ok(RunIteration { index, started_at, funding, funding_report, result, elapsed })
    }
}
