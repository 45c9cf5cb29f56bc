//! The storage transaction facade: begin/commit/rollback over the account
//! and transaction stores, with optimistic-concurrency conflict signalling.
//!
//! The engine is written against the [`Storage`] trait; this crate ships one
//! concrete implementation, [`InMemoryStore`], so a different backend could
//! be substituted without touching `engine.rs`. There is no ORM or migration
//! tooling here; the contract is the trait itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::account::{Account, AccountId};
use crate::errors::{ConcurrencyError, EngineError};
use crate::transaction::{Transaction, TransactionId, TransactionStatus};

/// Primitive reads/writes plus begin/commit/rollback over accounts and
/// transactions.
///
/// Writes to `Account` carry the optimistic-concurrency token from the read;
/// `commit` fails with [`ConcurrencyError::ConcurrencyConflict`] if any
/// staged account's token no longer matches the stored row. Retry policy (if
/// any) lives above this trait, in the engine.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Loads an account by its opaque id.
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, EngineError>;

    /// Loads an account by its external identity.
    async fn get_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Account>, EngineError>;

    /// Inserts a brand-new account (used when an external id resolves to no
    /// existing account) and returns it, unmutated.
    async fn insert_account(&self, account: Account) -> Result<Account, EngineError>;

    /// Loads a transaction by its opaque id.
    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, EngineError>;

    /// Loads a transaction by its client-supplied reference id.
    async fn get_transaction_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, EngineError>;

    /// Inserts a new `Pending` transaction and commits that insert
    /// immediately, so the reference becomes globally visible even if later
    /// steps fail. Fails with
    /// [`ConcurrencyError::DuplicateReference`] if `reference_id` already
    /// exists; the caller is expected to reload and return the winner.
    async fn insert_pending_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<Transaction, EngineError>;

    /// Persists a transaction's terminal state (`Completed`/`Failed`) or its
    /// `Reversed` transition, independent of any in-flight storage
    /// transaction; this is how a transaction gets marked `Failed` after a
    /// commit rolls back, and must survive that rollback.
    async fn persist_transaction(&self, transaction: Transaction) -> Result<(), EngineError>;

    /// Begins a storage transaction over the given accounts, which must have
    /// been read fresh (for their version tokens) by the caller beforehand.
    async fn begin(&self) -> Box<dyn StorageTransaction>;

    /// Returns every `Pending` transaction created before `cutoff`: the seam
    /// a background reconciliation sweeper would use to recover transactions
    /// stranded by a crash between the pending-insert commit and the locked
    /// commit. This crate does not implement the sweeper itself.
    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>, EngineError>;
}

/// A single logical storage transaction: stage account/transaction writes,
/// then `commit` (atomically, checking every staged account's version) or
/// `rollback` (discard everything staged).
#[async_trait]
pub trait StorageTransaction: Send {
    /// Stages an account write. The account's `version` field is the token
    /// the commit check is performed against.
    fn stage_account(&mut self, account: Account);

    /// Stages a transaction write.
    fn stage_transaction(&mut self, transaction: Transaction);

    /// Commits every staged write atomically. If any staged account's
    /// `version` no longer matches the currently-stored row, nothing is
    /// applied and a [`ConcurrencyError::ConcurrencyConflict`] is returned.
    /// On success, each committed account's `version` is advanced by one and
    /// its `updated_at` is left as staged.
    async fn commit(self: Box<Self>) -> Result<(), EngineError>;

    /// Discards every staged write.
    async fn rollback(self: Box<Self>);
}

/// An in-memory, single-process reference implementation of [`Storage`].
#[derive(Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    accounts_by_external_id: HashMap<String, AccountId>,
    transactions: HashMap<TransactionId, Transaction>,
    transactions_by_reference: HashMap<String, TransactionId>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        InMemoryStore {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, EngineError> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn get_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Account>, EngineError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts_by_external_id
            .get(external_id)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    async fn insert_account(&self, account: Account) -> Result<Account, EngineError> {
        let mut inner = self.inner.lock().await;
        if let Some(external_id) = account.external_id.clone() {
            inner
                .accounts_by_external_id
                .insert(external_id, account.id);
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, EngineError> {
        Ok(self.inner.lock().await.transactions.get(&id).cloned())
    }

    async fn get_transaction_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<Transaction>, EngineError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions_by_reference
            .get(reference_id)
            .and_then(|id| inner.transactions.get(id))
            .cloned())
    }

    async fn insert_pending_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<Transaction, EngineError> {
        let mut inner = self.inner.lock().await;
        if inner
            .transactions_by_reference
            .contains_key(&transaction.reference_id)
        {
            return Err(ConcurrencyError::DuplicateReference.into());
        }
        inner
            .transactions_by_reference
            .insert(transaction.reference_id.clone(), transaction.id);
        inner.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn persist_transaction(&self, transaction: Transaction) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        inner.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn begin(&self) -> Box<dyn StorageTransaction> {
        Box::new(InMemoryStorageTransaction {
            inner: self.inner.clone(),
            staged_accounts: Vec::new(),
            staged_transactions: Vec::new(),
        })
    }

    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Transaction>, EngineError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.timestamp < cutoff)
            .cloned()
            .collect())
    }
}

struct InMemoryStorageTransaction {
    inner: Arc<Mutex<Inner>>,
    staged_accounts: Vec<Account>,
    staged_transactions: Vec<Transaction>,
}

#[async_trait]
impl StorageTransaction for InMemoryStorageTransaction {
    fn stage_account(&mut self, account: Account) {
        self.staged_accounts.push(account);
    }

    fn stage_transaction(&mut self, transaction: Transaction) {
        self.staged_transactions.push(transaction);
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;

        for staged in &self.staged_accounts {
            let current_version = inner.accounts.get(&staged.id).map(|a| a.version);
            if current_version != Some(staged.version) {
                return Err(ConcurrencyError::ConcurrencyConflict.into());
            }
        }

        for mut staged in self.staged_accounts {
            staged.version += 1;
            if let Some(external_id) = staged.external_id.clone() {
                inner.accounts_by_external_id.insert(external_id, staged.id);
            }
            inner.accounts.insert(staged.id, staged);
        }
        for txn in self.staged_transactions {
            inner.transactions.insert(txn.id, txn);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        // Nothing was applied to `inner`; staged writes are simply dropped.
    }
}
