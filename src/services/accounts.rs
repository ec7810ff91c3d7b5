use std::collections::HashMap;

use async_trait::async_trait;

use crate::{error::LedgerError, models::Account};

/// Resolves the cloud account backing a lease.
///
/// Account records are owned elsewhere; the ledger only reads them.
#[async_trait]
pub trait AccountLookup: Send + Sync {
    /// Returns `LedgerError::NotFound` when no account has this id.
    async fn get_account(&self, account_id: &str) -> Result<Account, LedgerError>;
}

/// Account lookup over a fixed in-memory set.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountLookup {
    accounts: HashMap<String, Account>,
}

impl StaticAccountLookup {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.id.clone(), account))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountLookup for StaticAccountLookup {
    async fn get_account(&self, account_id: &str) -> Result<Account, LedgerError> {
        self.accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))
    }
}
