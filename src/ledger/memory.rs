//! In-process ledger backed by revm.
//!
//! Submitted transfers wait in a pending queue until somebody asks for a
//! receipt; at that point every pending transfer is mined, in submission
//! order, into a single block.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use revm::{
    context::TxEnv,
    database::{CacheDB, EmptyDB},
    primitives::TxKind,
    state::AccountInfo,
    Context, ExecuteCommitEvm, MainBuilder, MainContext,
};
use std::collections::HashMap;
use tracing::{debug, trace};

use super::{AssetId, LedgerClient, Receipt, TransferRequest, TxHandle, NATIVE_ASSET};
use crate::{error::LedgerError, Account, SignedTransaction};

/// Chain id the in-process EVM is configured with.
pub const CHAIN_ID: u64 = 1;

/// Seed of the development key used for the host account by default.
pub const DEV_HOST_SEED: u64 = 0x10ad;

/// Configuration for an [`InMemoryLedger`].
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Account the ledger hands out as its host account.
    pub host: Account,
    /// Genesis balance of the host account, in wei.
    pub genesis_balance: U256,
    /// Blocks a transfer needs on top of it before its receipt is returned.
    pub confirmations: u64,
    /// Additional accounts funded at genesis.
    pub genesis_accounts: Vec<(Address, U256)>,
    /// Whether to verify transfer signatures before execution.
    pub verify_signatures: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            host: Account::from_seed(DEV_HOST_SEED),
            genesis_balance: U256::from(1_000_000_000_000_000_000_000u128), // 1000 ETH
            confirmations: 1,
            genesis_accounts: Vec::new(),
            verify_signatures: true,
        }
    }
}

impl LedgerConfig {
    /// Sets the host account genesis balance.
    pub fn with_genesis_balance(mut self, balance: U256) -> Self {
        self.genesis_balance = balance;
        self
    }

    /// Sets the confirmation depth.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    /// Funds an extra account at genesis.
    pub fn with_genesis_account(mut self, address: Address, balance: U256) -> Self {
        self.genesis_accounts.push((address, balance));
        self
    }
}

struct LedgerState {
    db: CacheDB<EmptyDB>,
    pending: Vec<SignedTransaction>,
    receipts: HashMap<B256, Receipt>,
    block_number: u64,
    closed: bool,
}

impl LedgerState {
    fn account(&self, address: Address) -> Option<&AccountInfo> {
        self.db.cache.accounts.get(&address).map(|account| &account.info)
    }

    fn balance(&self, address: Address) -> U256 {
        self.account(address).map(|info| info.balance).unwrap_or_default()
    }

    /// Next nonce for `sender`, counting transfers that are still pending.
    fn next_nonce(&self, sender: Address) -> u64 {
        let committed = self.account(sender).map(|info| info.nonce).unwrap_or_default();
        let pending = self.pending.iter().filter(|tx| tx.from == sender).count() as u64;
        committed + pending
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.closed {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    /// Executes every pending transfer into one new block.
    fn mine(&mut self, verify_signatures: bool) {
        if self.pending.is_empty() {
            return;
        }

        self.block_number += 1;
        let block_number = self.block_number;
        let pending = std::mem::take(&mut self.pending);
        let db = std::mem::replace(&mut self.db, CacheDB::new(EmptyDB::default()));

        let mut evm = Context::mainnet().with_db(db).build_mainnet();

        for tx in &pending {
            if verify_signatures && !tx.verify() {
                self.receipts.insert(tx.tx_hash, Self::failed(tx.tx_hash, block_number));
                continue;
            }

            let tx_env = TxEnv {
                caller: tx.from,
                kind: TxKind::Call(tx.to),
                value: tx.value,
                gas_limit: tx.gas_limit,
                gas_price: tx.gas_price,
                nonce: tx.nonce,
                chain_id: Some(CHAIN_ID),
                ..Default::default()
            };

            let receipt = match evm.transact_commit(tx_env) {
                Ok(result) => Receipt {
                    tx_hash: tx.tx_hash,
                    status: result.is_success(),
                    block_number,
                    gas_used: result.gas_used(),
                },
                Err(e) => {
                    debug!(tx_hash = %tx.tx_hash, error = ?e, "transfer rejected");
                    Self::failed(tx.tx_hash, block_number)
                }
            };
            self.receipts.insert(tx.tx_hash, receipt);
        }

        self.db = evm.ctx.journaled_state.database;
        trace!(block_number, transfers = pending.len(), "mined block");
    }

    fn failed(tx_hash: B256, block_number: u64) -> Receipt {
        Receipt { tx_hash, status: false, block_number, gas_used: 0 }
    }
}

/// A ledger that runs entirely inside the process.
///
/// # Example
///
/// ```
/// use ledger_loadgen::{InMemoryLedger, LedgerClient, LedgerConfig, Account};
/// use alloy_primitives::U256;
///
/// # tokio_test_block_on(async {
/// let ledger = InMemoryLedger::new(LedgerConfig::default());
/// let host = ledger.host_account().await.unwrap();
/// let recipient = Account::from_seed(7);
///
/// let tx = ledger.transfer(&host, recipient.address, U256::from(1_000)).await.unwrap();
/// let receipt = ledger.await_receipt(&tx).await.unwrap();
/// assert!(receipt.status);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    host: Account,
    confirmations: u64,
    verify_signatures: bool,
}

impl InMemoryLedger {
    /// Creates a ledger whose genesis funds the host account and any extra
    /// genesis accounts.
    pub fn new(config: LedgerConfig) -> Self {
        let host = config.host;
        let mut db = CacheDB::new(EmptyDB::default());
        let genesis = std::iter::once((host.address, config.genesis_balance))
            .chain(config.genesis_accounts.iter().copied());
        for (address, balance) in genesis {
            let info = AccountInfo {
                balance,
                nonce: 0,
                code_hash: revm::primitives::KECCAK_EMPTY,
                code: None,
            };
            db.insert_account_info(address, info);
        }

        Self {
            state: Mutex::new(LedgerState {
                db,
                pending: Vec::new(),
                receipts: HashMap::new(),
                block_number: 0,
                closed: false,
            }),
            host,
            confirmations: config.confirmations.max(1),
            verify_signatures: config.verify_signatures,
        }
    }

    /// Current block height.
    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    /// Committed nonce of `address`.
    pub fn nonce(&self, address: Address) -> u64 {
        self.state
            .lock()
            .account(address)
            .map(|info| info.nonce)
            .unwrap_or_default()
    }

    /// Committed native balance of `address`. Unlike
    /// [`LedgerClient::get_balance`], this still answers after `close`.
    pub fn balance(&self, address: Address) -> U256 {
        self.state.lock().balance(address)
    }

    /// Number of transfers waiting to be mined.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether [`LedgerClient::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("host", &self.host.address)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_balance(&self, asset: AssetId, account: Address) -> Result<U256, LedgerError> {
        let state = self.state.lock();
        state.ensure_open()?;
        if asset != NATIVE_ASSET {
            return Err(LedgerError::UnknownAsset(asset));
        }
        Ok(state.balance(account))
    }

    async fn submit(
        &self,
        from: &Account,
        request: TransferRequest,
    ) -> Result<TxHandle, LedgerError> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        let nonce = state.next_nonce(from.address);
        let tx = SignedTransaction::new(from, &request, nonce, CHAIN_ID)?;
        let hash = tx.tx_hash;
        trace!(
            tx_hash = %hash,
            from = %tx.from,
            to = %tx.to,
            value = %tx.value,
            nonce,
            "queued transfer"
        );
        state.pending.push(tx);

        Ok(TxHandle { hash })
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, LedgerError> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if let Some(receipt) = state.receipts.get(&tx.hash) {
            return Ok(*receipt);
        }
        if !state.pending.iter().any(|pending| pending.tx_hash == tx.hash) {
            return Err(LedgerError::UnknownTransaction(tx.hash));
        }

        state.mine(self.verify_signatures);
        // Empty blocks stand in for the confirmations on top of inclusion.
        state.block_number += self.confirmations - 1;

        state
            .receipts
            .get(&tx.hash)
            .copied()
            .ok_or(LedgerError::UnknownTransaction(tx.hash))
    }

    async fn create_account(&self, secret: B256) -> Result<Account, LedgerError> {
        self.state.lock().ensure_open()?;
        Account::from_secret(secret)
    }

    async fn host_account(&self) -> Result<Account, LedgerError> {
        self.state.lock().ensure_open()?;
        Ok(self.host.clone())
    }

    async fn close(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.closed = true;
        debug!(pending = state.pending.len(), "ledger session closed");
        Ok(())
    }
}
