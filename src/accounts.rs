//! Funding source and process account provisioning.

use alloy_primitives::B256;
use tracing::info;

use crate::{error::HarnessError, ledger::LedgerClient, Account};

/// Where the funding source account comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum AccountSource {
    /// An explicitly supplied secret key.
    Secret(B256),
    /// The account the ledger's host environment provides.
    Host,
}

impl std::fmt::Debug for AccountSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(..)"),
            Self::Host => f.write_str("Host"),
        }
    }
}

impl From<Option<B256>> for AccountSource {
    fn from(secret: Option<B256>) -> Self {
        secret.map_or(Self::Host, Self::Secret)
    }
}

impl AccountSource {
    /// Resolves the funding source account through `ledger`.
    pub async fn resolve<L: LedgerClient + ?Sized>(
        &self,
        ledger: &L,
    ) -> Result<Account, HarnessError> {
        let account = match self {
            Self::Secret(secret) => ledger.create_account(*secret).await?,
            Self::Host => ledger.host_account().await?,
        };
        info!(source = ?self, address = %account.address, "resolved funding source");
        Ok(account)
    }
}

/// Creates the process account: a fresh key, registered with the ledger,
/// owned by this process for its whole lifetime.
pub async fn provision_process_account<L: LedgerClient + ?Sized>(
    ledger: &L,
) -> Result<Account, HarnessError> {
    let account = ledger.create_account(Account::random().secret()).await?;
    info!(address = %account.address, "provisioned process account");
    Ok(account)
}
