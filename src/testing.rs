//! Scripted ledger and sleeper used by unit tests.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use crate::{
    clock::Sleeper,
    error::LedgerError,
    ledger::{AssetId, LedgerClient, Receipt, TransferRequest, TxHandle},
    Account,
};

/// A call observed by [`ScriptedLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Balance(Address),
    Transfer { from: Address, to: Address, value: U256 },
    Receipt { status: bool },
    Close,
    Marker(String),
}

#[derive(Default)]
struct ScriptState {
    balances: HashMap<Address, U256>,
    /// Receipt statuses handed out in order; `true` once exhausted.
    receipt_script: VecDeque<bool>,
    /// Balance queries that fail before answering normally.
    balance_failures: usize,
    /// Submissions that go through before `submit_failures` start.
    submit_skips: usize,
    submit_failures: usize,
    /// Receipt waits that never resolve.
    stalled_receipts: usize,
    pending: HashMap<B256, (Address, Address, U256)>,
    ops: Vec<Op>,
    next_id: u64,
    closed: bool,
}

/// Ledger whose balances move only on successful receipts, with scripted
/// failures and a log of every call.
#[derive(Default)]
pub(crate) struct ScriptedLedger {
    state: Mutex<ScriptState>,
    host: Option<Account>,
}

impl ScriptedLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_host(mut self, host: Account) -> Self {
        self.host = Some(host);
        self
    }

    pub(crate) fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().balances.insert(address, balance);
    }

    pub(crate) fn credit(&self, address: Address, amount: U256) {
        *self.state.lock().balances.entry(address).or_default() += amount;
    }

    pub(crate) fn debit(&self, address: Address, amount: U256) {
        let mut state = self.state.lock();
        let balance = state.balances.entry(address).or_default();
        *balance = balance.saturating_sub(amount);
    }

    pub(crate) fn balance(&self, address: Address) -> U256 {
        self.state.lock().balances.get(&address).copied().unwrap_or_default()
    }

    pub(crate) fn script_receipts(&self, statuses: impl IntoIterator<Item = bool>) {
        self.state.lock().receipt_script.extend(statuses);
    }

    pub(crate) fn fail_balance_queries(&self, count: usize) {
        self.state.lock().balance_failures = count;
    }

    pub(crate) fn fail_submissions(&self, count: usize) {
        self.fail_submissions_after(0, count);
    }

    pub(crate) fn fail_submissions_after(&self, skip: usize, count: usize) {
        let mut state = self.state.lock();
        state.submit_skips = skip;
        state.submit_failures = count;
    }

    pub(crate) fn stall_receipts(&self, count: usize) {
        self.state.lock().stalled_receipts = count;
    }

    pub(crate) fn mark(&self, marker: impl Into<String>) {
        self.state.lock().ops.push(Op::Marker(marker.into()));
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }

    pub(crate) fn transfers(&self) -> Vec<(Address, Address, U256)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Transfer { from, to, value } => Some((from, to, value)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn get_balance(&self, _asset: AssetId, account: Address) -> Result<U256, LedgerError> {
        let mut state = self.state.lock();
        state.ops.push(Op::Balance(account));
        if state.balance_failures > 0 {
            state.balance_failures -= 1;
            return Err(LedgerError::Rejected("balance query failed".into()));
        }
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }

    async fn submit(
        &self,
        from: &Account,
        request: TransferRequest,
    ) -> Result<TxHandle, LedgerError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LedgerError::Closed);
        }
        if state.submit_skips > 0 {
            state.submit_skips -= 1;
        } else if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(LedgerError::Rejected("nonce too low".into()));
        }
        state.ops.push(Op::Transfer { from: from.address, to: request.to, value: request.value });
        state.next_id += 1;
        let hash = B256::from(U256::from(state.next_id).to_be_bytes::<32>());
        state.pending.insert(hash, (from.address, request.to, request.value));
        Ok(TxHandle { hash })
    }

    async fn await_receipt(&self, tx: &TxHandle) -> Result<Receipt, LedgerError> {
        let stalled = {
            let mut state = self.state.lock();
            let stalled = state.stalled_receipts > 0;
            state.stalled_receipts = state.stalled_receipts.saturating_sub(1);
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        let (from, to, value) = state
            .pending
            .remove(&tx.hash)
            .ok_or(LedgerError::UnknownTransaction(tx.hash))?;
        let status = state.receipt_script.pop_front().unwrap_or(true);
        state.ops.push(Op::Receipt { status });

        if status {
            let sender = state.balances.entry(from).or_default();
            *sender = sender.saturating_sub(value);
            *state.balances.entry(to).or_default() += value;
        }

        Ok(Receipt { tx_hash: tx.hash, status, block_number: state.next_id, gas_used: 0 })
    }

    async fn create_account(&self, secret: B256) -> Result<Account, LedgerError> {
        Account::from_secret(secret)
    }

    async fn host_account(&self) -> Result<Account, LedgerError> {
        self.host.clone().ok_or(LedgerError::NoHostAccount)
    }

    async fn close(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.ops.push(Op::Close);
        state.closed = true;
        Ok(())
    }
}

/// Sleeper that returns immediately, recording each requested delay and
/// running an optional hook first.
#[derive(Clone, Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
    hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RecordingSleeper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self { sleeps: Default::default(), hook: Some(Arc::new(hook)) }
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Some(hook) = &self.hook {
            hook();
        }
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}
