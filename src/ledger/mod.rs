//! Ledger client abstraction.
//!
//! This module provides the [`LedgerClient`] trait the harness talks to and
//! the [`InMemoryLedger`] implementation that executes transfers in-process.

mod memory;

pub use memory::{InMemoryLedger, LedgerConfig};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::{error::LedgerError, Account};

/// Identifier of a fungible asset on the ledger.
pub type AssetId = u64;

/// The ledger's native asset.
pub const NATIVE_ASSET: AssetId = 0;

/// Gas consumed by a plain native transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Gas price used for every transfer the harness issues (4 gwei).
pub const GAS_PRICE: u128 = 4_000_000_000;

/// Fee charged for a transfer that uses `gas_limit` gas at [`GAS_PRICE`].
pub fn fee(gas_limit: u64) -> U256 {
    U256::from(gas_limit) * U256::from(GAS_PRICE)
}

/// A transfer to submit on behalf of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Recipient address.
    pub to: Address,
    /// Native value to move, in wei.
    pub value: U256,
    /// Gas limit for the transfer.
    pub gas_limit: u64,
    /// Gas price, in wei.
    pub gas_price: u128,
}

impl TransferRequest {
    /// A plain native transfer at the default gas limit and price.
    pub fn native(to: Address, value: U256) -> Self {
        Self { to, value, gas_limit: TRANSFER_GAS_LIMIT, gas_price: GAS_PRICE }
    }

    /// Sets the gas limit.
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Maximum fee this transfer can be charged.
    pub fn max_fee(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.gas_price)
    }
}

/// Handle to a submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle {
    /// Transaction hash.
    pub hash: B256,
}

/// Confirmation record for a submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Whether the transfer succeeded.
    pub status: bool,
    /// Block the transfer was included in.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: u64,
}

/// Session with the target ledger.
///
/// Implementations must tolerate concurrent calls from many agents.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Returns `account`'s balance of `asset`.
    async fn get_balance(&self, asset: AssetId, account: Address) -> Result<U256, LedgerError>;

    /// Signs and submits a transfer from `from`.
    async fn submit(
        &self,
        from: &Account,
        request: TransferRequest,
    ) -> Result<TxHandle, LedgerError>;

    /// Waits until the transfer is final and returns its receipt.
    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, LedgerError>;

    /// Registers an account controlled by `secret`.
    async fn create_account(&self, secret: B256) -> Result<Account, LedgerError>;

    /// Returns the account the host environment provides, if any.
    async fn host_account(&self) -> Result<Account, LedgerError>;

    /// Tears down the session.
    async fn close(&self) -> Result<(), LedgerError>;

    /// Submits a plain native transfer of `amount`.
    async fn transfer(
        &self,
        from: &Account,
        to: Address,
        amount: U256,
    ) -> Result<TxHandle, LedgerError> {
        self.submit(from, TransferRequest::native(to, amount)).await
    }
}
