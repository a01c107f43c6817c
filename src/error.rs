//! Error types.

use alloy_primitives::B256;
use thiserror::Error;

use crate::ledger::AssetId;

/// Errors reported by a [`LedgerClient`](crate::LedgerClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger session has been closed.
    #[error("ledger session is closed")]
    Closed,
    /// The ledger does not know the requested asset.
    #[error("unknown asset {0}")]
    UnknownAsset(AssetId),
    /// No transfer with this hash was ever submitted.
    #[error("unknown transaction {0}")]
    UnknownTransaction(B256),
    /// The supplied secret is not a valid signing key.
    #[error("invalid account secret: {0}")]
    InvalidSecret(String),
    /// The ledger has no host-provided account to hand out.
    #[error("ledger has no host account")]
    NoHostAccount,
    /// The ledger refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Transient failures seen while topping up the process account.
///
/// These are absorbed by the [`FundingGuard`](crate::FundingGuard) and only
/// ever logged.
#[derive(Debug, Error)]
pub enum FundingError {
    /// A balance query or transfer submission failed.
    #[error("ledger call failed: {0}")]
    Rpc(#[from] LedgerError),
    /// The top-up transfer was included but reported failure.
    #[error("top-up transfer {0} reverted")]
    Reverted(B256),
    /// No receipt arrived within the receipt timeout.
    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(B256),
}

/// Errors raised by an agent batch while it runs.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A ledger call made by an agent failed.
    #[error("ledger call failed: {0}")]
    Ledger(#[from] LedgerError),
    /// The workload selects an asset the batch cannot transact in.
    #[error("asset {0} is not supported by this workload")]
    UnsupportedAsset(AssetId),
    /// An agent task panicked or was aborted.
    #[error("agent task failed: {0}")]
    AgentPanicked(String),
}

/// Top-level error returned by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The workload kind is not one the harness knows how to fund and run.
    #[error("unsupported workload kind: {0}")]
    UnsupportedWorkloadKind(String),
    /// A workload that needs an asset was configured without one.
    #[error("workload requires at least one asset id")]
    NoAssetSelected,
    /// A ledger call outside the funding loop failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The agent batch failed.
    #[error("batch execution failed: {0}")]
    Batch(#[from] BatchError),
    /// The run was cancelled while waiting.
    #[error("run cancelled")]
    Cancelled,
}
