//! Teardown refund of the process account's residual balance.

use alloy_primitives::{Address, B256, U256};
use tracing::{info, warn};

use crate::{
    error::LedgerError,
    ledger::{LedgerClient, NATIVE_ASSET},
    Account,
};

/// What the refund did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    /// The balance did not exceed the reserve; nothing was sent.
    Skipped {
        /// Balance observed at teardown.
        balance: U256,
    },
    /// The residual value reached the destination.
    Refunded {
        /// Value transferred.
        value: U256,
        /// Hash of the refund transfer.
        tx_hash: B256,
    },
    /// The refund transfer was included but reported failure.
    Failed {
        /// Value that was attempted.
        value: U256,
        /// Hash of the refund transfer.
        tx_hash: B256,
    },
}

impl RefundOutcome {
    /// Value that actually reached the destination.
    pub fn refunded(&self) -> U256 {
        match self {
            Self::Refunded { value, .. } => *value,
            Self::Skipped { .. } | Self::Failed { .. } => U256::ZERO,
        }
    }
}

/// Sends everything above `reserve` from `account` back to `destination`.
///
/// The reserve stays behind to pay for the refund transfer itself. A failed
/// refund is reported, not retried.
pub async fn refund<L: LedgerClient + ?Sized>(
    ledger: &L,
    account: &Account,
    destination: Address,
    reserve: U256,
) -> Result<RefundOutcome, LedgerError> {
    let balance = ledger.get_balance(NATIVE_ASSET, account.address).await?;
    if balance <= reserve {
        info!(%balance, %reserve, "nothing to refund");
        return Ok(RefundOutcome::Skipped { balance });
    }

    let value = balance - reserve;
    info!(%value, %destination, "refunding residual balance");
    let handle = ledger.transfer(account, destination, value).await?;
    let receipt = ledger.await_receipt(&handle).await?;

    if receipt.status {
        Ok(RefundOutcome::Refunded { value, tx_hash: handle.hash })
    } else {
        warn!(tx_hash = %handle.hash, %value, "refund transfer failed");
        Ok(RefundOutcome::Failed { value, tx_hash: handle.hash })
    }
}
