//! Funding guard.
//!
//! Keeps the process account above its threshold by topping it up from the
//! funding source. Sibling processes draw from the same source concurrently,
//! so submissions can lose nonce races and receipts can report failure; every
//! such failure is treated as transient and retried after a fixed backoff.
//! There is no attempt limit: the guard returns once the threshold holds or
//! the run is cancelled.
//!
//! The guard never assumes a failed attempt did not land. After every failure
//! it goes back to polling the balance, so a top-up made by someone else (or a
//! transfer that landed despite a lost receipt) ends the loop without a
//! redundant transfer.

use alloy_primitives::Address;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    budget::FundingSpec,
    clock::{Sleeper, TokioSleeper},
    error::{FundingError, HarnessError},
    ledger::{LedgerClient, NATIVE_ASSET},
    Account,
};

/// Delay between failed funding attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// How long to wait for a top-up receipt before treating it as lost.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// States of the funding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FundingState {
    /// Read the balance and compare it to the threshold.
    Polling,
    /// Submit one top-up and wait for its receipt.
    Attempting,
    /// Wait out the backoff after a transient failure.
    Backoff,
    /// The threshold holds.
    Satisfied,
}

/// What a call to [`FundingGuard::ensure_funded`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FundingReport {
    /// Balance polls made.
    pub polls: usize,
    /// Top-up attempts made, including ones the ledger rejected.
    pub attempts: usize,
    /// Backoff sleeps taken.
    pub backoffs: usize,
}

/// Retry loop that tops up an account until it holds at least the threshold.
#[derive(Debug, Clone)]
pub struct FundingGuard<S = TokioSleeper> {
    backoff: Duration,
    receipt_timeout: Duration,
    sleeper: S,
}

impl Default for FundingGuard<TokioSleeper> {
    fn default() -> Self {
        Self::new(TokioSleeper)
    }
}

impl<S: Sleeper> FundingGuard<S> {
    /// Creates a guard that sleeps through `sleeper`.
    pub fn new(sleeper: S) -> Self {
        Self { backoff: DEFAULT_BACKOFF, receipt_timeout: DEFAULT_RECEIPT_TIMEOUT, sleeper }
    }

    /// Sets the backoff between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the receipt timeout.
    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Blocks until `account` holds at least `spec.threshold` of the native
    /// asset, topping it up with `spec.top_up` from `source` as needed.
    ///
    /// Only returns an error, [`HarnessError::Cancelled`], when `cancel`
    /// fires during a backoff.
    pub async fn ensure_funded<L: LedgerClient + ?Sized>(
        &self,
        ledger: &L,
        source: &Account,
        account: Address,
        spec: &FundingSpec,
        cancel: &CancellationToken,
    ) -> Result<FundingReport, HarnessError> {
        let mut report = FundingReport::default();
        let mut state = FundingState::Polling;

        loop {
            state = match state {
                FundingState::Polling => {
                    report.polls += 1;
                    match ledger.get_balance(NATIVE_ASSET, account).await {
                        Ok(balance) if balance >= spec.threshold => FundingState::Satisfied,
                        Ok(balance) => {
                            debug!(
                                %account,
                                %balance,
                                threshold = %spec.threshold,
                                "account below threshold"
                            );
                            FundingState::Attempting
                        }
                        Err(e) => {
                            warn!(error = %FundingError::from(e), "balance query failed");
                            FundingState::Backoff
                        }
                    }
                }
                FundingState::Attempting => {
                    report.attempts += 1;
                    info!(
                        %account,
                        amount = %spec.top_up,
                        attempt = report.attempts,
                        "funding process account"
                    );
                    match self.top_up(ledger, source, account, spec).await {
                        Ok(()) => FundingState::Polling,
                        Err(e) => {
                            warn!(
                                error = %e,
                                backoff_secs = self.backoff.as_secs_f64(),
                                "funding attempt failed, retrying"
                            );
                            FundingState::Backoff
                        }
                    }
                }
                FundingState::Backoff => {
                    report.backoffs += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(HarnessError::Cancelled),
                        _ = self.sleeper.sleep(self.backoff) => FundingState::Polling,
                    }
                }
                FundingState::Satisfied => {
                    debug!(
                        %account,
                        polls = report.polls,
                        attempts = report.attempts,
                        "account funded"
                    );
                    return Ok(report);
                }
            };
        }
    }

    /// Submits one top-up and waits for its receipt.
    async fn top_up<L: LedgerClient + ?Sized>(
        &self,
        ledger: &L,
        source: &Account,
        account: Address,
        spec: &FundingSpec,
    ) -> Result<(), FundingError> {
        let handle = ledger.transfer(source, account, spec.top_up).await?;
        let receipt = tokio::time::timeout(self.receipt_timeout, ledger.await_receipt(&handle))
            .await
            .map_err(|_| FundingError::ReceiptTimeout(handle.hash))??;

        if !receipt.status {
            return Err(FundingError::Reverted(handle.hash));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Op, RecordingSleeper, ScriptedLedger};
    use alloy_primitives::U256;
    use std::sync::Arc;

    fn spec(threshold: u64, top_up: u64) -> FundingSpec {
        FundingSpec { threshold: U256::from(threshold), top_up: U256::from(top_up) }
    }

    fn accounts() -> (Account, Account) {
        (Account::from_seed(1), Account::from_seed(2))
    }

    #[tokio::test]
    async fn test_already_funded_issues_no_transfer() {
        let (source, process) = accounts();
        let ledger = ScriptedLedger::new();
        ledger.set_balance(process.address, U256::from(1_000));
        let sleeper = RecordingSleeper::new();
        let guard = FundingGuard::new(sleeper.clone());

        let report = guard
            .ensure_funded(
                &ledger,
                &source,
                process.address,
                &spec(1_000, 2_000),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report, FundingReport { polls: 1, attempts: 0, backoffs: 0 });
        assert!(ledger.transfers().is_empty());
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_single_top_up() {
        let (source, process) = accounts();
        let ledger = ScriptedLedger::new();
        ledger.set_balance(source.address, U256::from(1_000_000));
        let guard = FundingGuard::new(RecordingSleeper::new());

        let report = guard
            .ensure_funded(
                &ledger,
                &source,
                process.address,
                &spec(100, 150),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report, FundingReport { polls: 2, attempts: 1, backoffs: 0 });
        assert_eq!(ledger.transfers(), vec![(source.address, process.address, U256::from(150))]);
        assert_eq!(ledger.balance(process.address), U256::from(150));
    }

    #[tokio::test]
    async fn test_failed_receipt_backs_off_once_then_succeeds() {
        let (source, process) = accounts();
        let ledger = ScriptedLedger::new();
        ledger.script_receipts([false, true]);
        let sleeper = RecordingSleeper::new();
        let guard = FundingGuard::new(sleeper.clone());

        let report = guard
            .ensure_funded(
                &ledger,
                &source,
                process.address,
                &spec(100, 150),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report, FundingReport { polls: 3, attempts: 2, backoffs: 1 });
        assert_eq!(sleeper.sleeps(), vec![DEFAULT_BACKOFF]);
        assert_eq!(ledger.transfers().len(), 2);
        assert_eq!(ledger.balance(process.address), U256::from(150));

        // The balance is re-read between the failure and the second attempt.
        let ops = ledger.ops();
        let failed = ops.iter().position(|op| *op == Op::Receipt { status: false }).unwrap();
        assert_eq!(ops[failed + 1], Op::Balance(process.address));
    }

    #[tokio::test]
    async fn test_external_top_up_during_backoff_skips_transfer() {
        let (source, process) = accounts();
        let ledger = Arc::new(ScriptedLedger::new());
        ledger.script_receipts([false]);

        // A sibling funds the account while we sleep.
        let sibling = ledger.clone();
        let target = process.address;
        let sleeper =
            RecordingSleeper::with_hook(move || sibling.credit(target, U256::from(500)));
        let guard = FundingGuard::new(sleeper.clone());

        let report = guard
            .ensure_funded(
                ledger.as_ref(),
                &source,
                process.address,
                &spec(100, 150),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report, FundingReport { polls: 2, attempts: 1, backoffs: 1 });
        assert_eq!(ledger.transfers().len(), 1);
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_submission_and_query_failures_are_retried() {
        let (source, process) = accounts();
        let ledger = ScriptedLedger::new();
        ledger.fail_balance_queries(2);
        ledger.fail_submissions(1);
        let sleeper = RecordingSleeper::new();
        let guard = FundingGuard::new(sleeper.clone()).with_backoff(Duration::from_millis(10));

        let report = guard
            .ensure_funded(
                &ledger,
                &source,
                process.address,
                &spec(100, 100),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Two failed polls, one rejected submission, then a clean attempt.
        assert_eq!(report.backoffs, 3);
        assert_eq!(report.attempts, 2);
        assert_eq!(ledger.transfers().len(), 1);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(10); 3]);
    }

    #[tokio::test]
    async fn test_lost_receipt_times_out_and_repolls() {
        let (source, process) = accounts();
        let ledger = Arc::new(ScriptedLedger::new());
        ledger.stall_receipts(1);

        // The stalled top-up lands while we back off.
        let landed = ledger.clone();
        let target = process.address;
        let sleeper = RecordingSleeper::with_hook(move || landed.credit(target, U256::from(150)));
        let guard = FundingGuard::new(sleeper.clone())
            .with_receipt_timeout(Duration::from_millis(20));

        let report = guard
            .ensure_funded(
                ledger.as_ref(),
                &source,
                process.address,
                &spec(100, 150),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report, FundingReport { polls: 2, attempts: 1, backoffs: 1 });
        assert_eq!(sleeper.sleeps(), vec![DEFAULT_BACKOFF]);
        assert_eq!(ledger.transfers().len(), 1);

        let ops = ledger.ops();
        let submitted = ops.iter().position(|op| matches!(op, Op::Transfer { .. })).unwrap();
        assert_eq!(ops[submitted + 1..], [Op::Balance(process.address)]);
    }

    #[tokio::test]
    async fn test_zero_threshold_is_always_satisfied() {
        let (source, process) = accounts();
        let ledger = ScriptedLedger::new();
        let guard = FundingGuard::new(RecordingSleeper::new());

        let report = guard
            .ensure_funded(
                &ledger,
                &source,
                process.address,
                &spec(0, 0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let (source, process) = accounts();
        let ledger = ScriptedLedger::new();
        ledger.script_receipts([false]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let guard = FundingGuard::new(TokioSleeper);

        let err = guard
            .ensure_funded(&ledger, &source, process.address, &spec(100, 150), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Cancelled));
        assert_eq!(ledger.transfers().len(), 1);
    }
}
