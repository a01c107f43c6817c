//! Funded load-generation harness for a transactional ledger.
//!
//! A run provisions one dedicated account per process, tops it up from a
//! shared funding source before every iteration, drives a batch of workload
//! agents against the ledger, and finally returns whatever is left back to
//! the funding source.
//!
//! # Architecture
//!
//! The crate is organized around four pieces of control logic:
//!
//! - **Budget**: [`budget::estimate`] turns a [`WorkloadDescriptor`] into a
//!   [`FundingSpec`] (minimum threshold and padded top-up).
//! - **Funding guard**: [`FundingGuard`] polls the process account and tops it
//!   up until the threshold holds, retrying transient failures forever.
//! - **Run driver**: [`RunDriver`] runs the labeled iterations in order.
//! - **Refund**: [`refund::refund`] sends the residual balance back.
//!
//! The ledger itself and the workload agents are collaborators reached through
//! the [`LedgerClient`] and [`AgentBatchExecutor`] traits. [`InMemoryLedger`]
//! is a revm-backed ledger that runs in-process.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledger_loadgen::{
//!     accounts::{provision_process_account, AccountSource},
//!     clock::TokioSleeper,
//!     DriverConfig, FundingGuard, InMemoryLedger, KindDispatch, LedgerConfig, LoopBound,
//!     RunDriver, WorkloadDescriptor,
//! };
//!
//! # async fn demo() -> Result<(), ledger_loadgen::HarnessError> {
//! let ledger = Arc::new(InMemoryLedger::new(LedgerConfig::default()));
//! let source = AccountSource::Host.resolve(ledger.as_ref()).await?;
//! let process = provision_process_account(ledger.as_ref()).await?;
//!
//! let workload: WorkloadDescriptor = "payment".parse::<ledger_loadgen::WorkloadKind>()?
//!     .describe(10, 5, vec![0]);
//! let driver = RunDriver::new(
//!     ledger,
//!     source,
//!     process,
//!     workload,
//!     KindDispatch::default(),
//!     FundingGuard::new(TokioSleeper),
//!     DriverConfig::default().with_bound(LoopBound::Fixed(3)),
//! );
//! let summary = driver.run().await?;
//! println!("ran {} iterations", summary.iterations);
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod agents;
pub mod budget;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod funding;
pub mod ledger;
pub mod refund;
pub mod telemetry;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

pub use accounts::AccountSource;
pub use agents::{
    AgentBatch, AgentBatchExecutor, BatchFactory, BatchSettings, ExecutionResult, KindDispatch,
};
pub use budget::FundingSpec;
pub use driver::{DriverConfig, LoopBound, RunDriver, RunIteration, RunSummary};
pub use error::{BatchError, FundingError, HarnessError, LedgerError};
pub use funding::{FundingGuard, FundingReport};
pub use ledger::{
    AssetId, InMemoryLedger, LedgerClient, LedgerConfig, Receipt, TransferRequest, TxHandle,
};
pub use refund::RefundOutcome;
pub use workload::{WorkloadDescriptor, WorkloadKind};

use alloy_primitives::{keccak256, Address, Signature, B256, U256};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::{rngs::{OsRng, StdRng}, Rng, SeedableRng};

// ============================================================================
// Account & Key Management
// ============================================================================

/// An account with its signing key for transaction signing.
#[derive(Clone)]
pub struct Account {
    /// The secp256k1 signing key.
    pub signing_key: SigningKey,
    /// The Ethereum address derived from the public key.
    pub address: Address,
}

impl Account {
    /// Creates a new account from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self { signing_key, address }
    }

    /// Builds an account from a raw 32-byte secret.
    pub fn from_secret(secret: B256) -> Result<Self, LedgerError> {
        let signing_key = SigningKey::from_bytes(&secret.0.into())
            .map_err(|e| LedgerError::InvalidSecret(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Generates a fresh account from the operating system RNG.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Generates a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        loop {
            let mut key_bytes = [0u8; 32];
            rng.fill(&mut key_bytes);
            if let Ok(signing_key) = SigningKey::from_bytes(&key_bytes.into()) {
                return Self::from_signing_key(signing_key);
            }
        }
    }

    /// Returns the raw secret backing this account.
    pub fn secret(&self) -> B256 {
        B256::from_slice(&self.signing_key.to_bytes())
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives an Ethereum address from a secp256k1 public key.
fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Signed Transaction
// ============================================================================

/// A signed native-asset transfer.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// The sender's address.
    pub from: Address,
    /// The recipient's address.
    pub to: Address,
    /// The value to transfer in wei.
    pub value: U256,
    /// The sender nonce.
    pub nonce: u64,
    /// Maximum gas the transfer may consume.
    pub gas_limit: u64,
    /// Price paid per unit of gas, in wei.
    pub gas_price: u128,
    /// The ECDSA signature.
    pub signature: Signature,
    /// The hash of the transaction data that was signed.
    pub tx_hash: B256,
}

impl SignedTransaction {
    /// Signs a transfer described by `request` with the sender's key.
    pub fn new(
        account: &Account,
        request: &TransferRequest,
        nonce: u64,
        chain_id: u64,
    ) -> Result<Self, LedgerError> {
        let tx_hash = Self::compute_tx_hash(account.address, request, nonce, chain_id);
        let signature = Self::sign(&account.signing_key, tx_hash)?;

        Ok(Self {
            from: account.address,
            to: request.to,
            value: request.value,
            nonce,
            gas_limit: request.gas_limit,
            gas_price: request.gas_price,
            signature,
            tx_hash,
        })
    }

    /// Computes the transaction hash for signing.
    fn compute_tx_hash(
        from: Address,
        request: &TransferRequest,
        nonce: u64,
        chain_id: u64,
    ) -> B256 {
        let mut data = Vec::with_capacity(20 + 20 + 32 + 8 + 8 + 16 + 8);
        data.extend_from_slice(from.as_slice());
        data.extend_from_slice(request.to.as_slice());
        data.extend_from_slice(&request.value.to_be_bytes::<32>());
        data.extend_from_slice(&request.gas_limit.to_be_bytes());
        data.extend_from_slice(&request.gas_price.to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&chain_id.to_be_bytes());
        keccak256(&data)
    }

    fn sign(signing_key: &SigningKey, tx_hash: B256) -> Result<Signature, LedgerError> {
        let (sig, recovery_id) = signing_key
            .sign_prehash_recoverable(tx_hash.as_slice())
            .map_err(|e| LedgerError::Rejected(format!("signing failed: {e}")))?;

        Ok(Signature::from_signature_and_parity(sig, recovery_id.is_y_odd()))
    }

    /// Recovers the sender's address from the signature.
    /// Returns None if signature verification fails.
    pub fn recover_signer(&self) -> Option<Address> {
        self.signature
            .recover_address_from_prehash(&self.tx_hash)
            .ok()
    }

    /// Verifies the signature and returns true if valid.
    pub fn verify(&self) -> bool {
        self.recover_signer()
            .map(|addr| addr == self.from)
            .unwrap_or(false)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_generation() {
        let acc1 = Account::from_seed(1);
        let acc2 = Account::from_seed(2);

        // Different seeds produce different accounts.
        assert_ne!(acc1.address, acc2.address);

        // Same seed produces same account.
        let acc1_copy = Account::from_seed(1);
        assert_eq!(acc1.address, acc1_copy.address);
    }

    #[test]
    fn test_secret_round_trips_to_same_address() {
        let account = Account::random();
        let restored = Account::from_secret(account.secret()).unwrap();
        assert_eq!(account.address, restored.address);
    }

    #[test]
    fn test_zero_secret_is_rejected() {
        assert!(matches!(
            Account::from_secret(B256::ZERO),
            Err(LedgerError::InvalidSecret(_))
        ));
    }

    #[test]
    fn test_signature_verification() {
        let account = Account::from_seed(42);
        let request = TransferRequest::native(Address::ZERO, U256::from(1000));
        let tx = SignedTransaction::new(&account, &request, 0, 1).unwrap();

        assert!(tx.verify());
        assert_eq!(tx.recover_signer(), Some(account.address));
    }
}
