//! The transaction engine: the orchestrator that turns a
//! [`wire::ProcessTransactionRequest`] into a durable balance mutation.
//!
//! `process_transaction` implements the eleven-step flow of the design:
//! resolve account(s) -> idempotency check -> create pending transaction ->
//! acquire ordered locks -> begin storage tx -> apply operation -> mark
//! terminal -> commit or rollback -> publish event -> return projection.

use std::sync::Arc;
use uuid::Uuid;

use tokio_util::sync::CancellationToken;

use crate::account::{Account, AccountId};
use crate::errors::{BusinessRuleError, ConcurrencyError, EngineError};
use crate::events::{DomainEvent, EventBus};
use crate::locks::LockManager;
use crate::money::Money;
use crate::storage::Storage;
use crate::transaction::{OperationType, Transaction, TransactionId, TransactionStatus};
use crate::wire::{ProcessTransactionRequest, ProcessTransactionResponse};

/// The orchestrator tying the account aggregate, lock manager, storage
/// facade and event bus together.
#[derive(Clone)]
pub struct TransactionEngine {
    storage: Arc<dyn Storage>,
    locks: Arc<LockManager>,
    events: EventBus,
}

impl TransactionEngine {
    /// Builds an engine over the given storage, lock manager, and event bus
    /// producer handle.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, locks: Arc<LockManager>, events: EventBus) -> Self {
        TransactionEngine {
            storage,
            locks,
            events,
        }
    }

    /// Processes one `ProcessTransaction` request to completion.
    ///
    /// Cancellation is honored at every suspension point up to the storage
    /// commit; once the commit has succeeded the transaction is `Completed`
    /// and the event is published on a best-effort basis regardless of a
    /// cancellation that arrives afterward (partial application is
    /// impossible because the lock spans the storage transaction).
    pub async fn process_transaction(
        &self,
        request: ProcessTransactionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessTransactionResponse, EngineError> {
        // Step 1: resolve the primary account, creating it on a missing
        // external identity (never on a missing opaque id).
        let account = self.resolve_or_create_account(&request.account_id).await?;

        // Step 2: idempotency short-circuit.
        if let Some(existing) = self
            .storage
            .get_transaction_by_reference(&request.reference_id)
            .await?
        {
            return self.project(&existing).await;
        }

        // Step 3: parse operation from the fixed vocabulary.
        let operation = OperationType::parse(&request.operation)?;

        // Step 4: amount is already integer minor units on the wire; no
        // conversion happens at this boundary (see Design Notes on money).
        let amount = Money::from_minor_units(request.amount);
        if !amount.is_positive() {
            return Err(EngineError::Validation(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        // Step 5: resolve the target account for Transfer.
        let target_account = if operation == OperationType::Transfer {
            let raw = request
                .target_account_id
                .as_deref()
                .ok_or_else(|| EngineError::missing_target_account(operation))?;
            Some(self.resolve_existing_account(raw).await?)
        } else {
            None
        };

        // Step 6: parse (not resolve) the original transaction id for
        // Reversal; existence is verified under the lock.
        let original_transaction_id = if operation == OperationType::Reversal {
            let raw = request.original_transaction_id.as_deref().ok_or_else(|| {
                EngineError::Validation("reversal requires original_transaction_id".to_string())
            })?;
            let uuid = Uuid::parse_str(raw).map_err(|_| {
                EngineError::Validation(format!("original_transaction_id '{raw}' is not a valid id"))
            })?;
            Some(TransactionId(uuid))
        } else {
            None
        };

        // Step 7: persist the Pending transaction; this is what fixes
        // idempotency even if everything after this fails.
        let pending = match Transaction::new(
            request.reference_id.clone(),
            operation,
            amount,
            account.id,
            target_account.as_ref().map(|a| a.id),
            original_transaction_id,
            request.metadata.clone(),
        ) {
            Ok(txn) => txn,
            Err(err) => return Err(err),
        };

        let pending = match self.storage.insert_pending_transaction(pending).await {
            Ok(txn) => txn,
            Err(EngineError::Concurrency(ConcurrencyError::DuplicateReference)) => {
                // Lost the race on reference_id; reload and return the winner.
                let winner = self
                    .storage
                    .get_transaction_by_reference(&request.reference_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::InfrastructureFatal(
                            "duplicate reference reported but winner not found".to_string(),
                        )
                    })?;
                return self.project(&winner).await;
            }
            Err(err) => return Err(err),
        };

        if cancel.is_cancelled() {
            // Not yet committed past the pending insert; safe to abort here.
            return Err(EngineError::InfrastructureFatal(
                "request cancelled before commit".to_string(),
            ));
        }

        // Step 8: compute the canonical lock set. For a Reversal, this is
        // the *original* transaction's account(s), discovered by an
        // unlocked peek (re-verified authoritatively once the lock is held).
        let lock_set = self.compute_lock_set(&pending).await?;

        // Steps 9-11, all under the ordered lock set.
        let outcome = self
            .locks
            .with_lock(&lock_set, || self.apply_and_commit(pending.clone(), cancel))
            .await;

        let finished = match outcome {
            Ok(finished) => finished,
            Err(err) => return Err(err),
        };

        // Step 10: publish (best-effort, never blocks the caller).
        self.events.publish(DomainEvent::transaction_processed(
            finished.id,
            finished.status,
        ));

        // Step 11: project the response.
        self.project(&finished).await
    }

    async fn compute_lock_set(&self, pending: &Transaction) -> Result<Vec<AccountId>, EngineError> {
        match pending.operation_type {
            OperationType::Transfer => Ok(vec![
                pending.account_id,
                pending
                    .target_account_id
                    .expect("transfer transaction always carries a target"),
            ]),
            OperationType::Reversal => {
                let original_id = pending
                    .original_transaction_id
                    .expect("reversal transaction always carries an original id");
                match self.storage.get_transaction(original_id).await? {
                    Some(original) => {
                        let mut ids = vec![original.account_id];
                        if let Some(target) = original.target_account_id {
                            ids.push(target);
                        }
                        Ok(ids)
                    }
                    // Original doesn't exist; lock just the requested account so
                    // the authoritative check under the lock can fail cleanly.
                    None => Ok(vec![pending.account_id]),
                }
            }
            _ => Ok(vec![pending.account_id]),
        }
    }

    /// The maximum number of times a single lock-holding commit attempt is
    /// retried after an optimistic-concurrency conflict before giving up and
    /// surfacing the conflict to the caller.
    const MAX_COMMIT_ATTEMPTS: u32 = 3;

    /// Steps 9 (apply + persist + commit/rollback) and the transaction's own
    /// terminal-state bookkeeping. Runs entirely inside the lock.
    ///
    /// A stale-version conflict on commit is retried in place (reloading the
    /// accounts and re-applying the operation) rather than failing the
    /// transaction: the conflict is transient, not a business-rule rejection.
    /// Only a genuine business-rule or not-found outcome marks the
    /// transaction `Failed`; a conflict that survives every retry is
    /// returned as a `Concurrency` error, leaving the transaction `Pending`
    /// for the caller to retry.
    async fn apply_and_commit(
        &self,
        mut pending: Transaction,
        cancel: &CancellationToken,
    ) -> Result<Transaction, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::InfrastructureFatal(
                "request cancelled before lock-holding commit".to_string(),
            ));
        }

        for attempt in 1..=Self::MAX_COMMIT_ATTEMPTS {
            match self.try_apply(&pending).await {
                Ok(mutated_accounts) => {
                    let mut tx = self.storage.begin().await;
                    for account in mutated_accounts {
                        tx.stage_account(account);
                    }
                    let mut completed = pending.clone();
                    completed.mark_completed();
                    tx.stage_transaction(completed.clone());
                    match tx.commit().await {
                        Ok(()) => return Ok(completed),
                        Err(EngineError::Concurrency(ConcurrencyError::ConcurrencyConflict)) => {
                            if attempt == Self::MAX_COMMIT_ATTEMPTS {
                                return Err(EngineError::Concurrency(
                                    ConcurrencyError::ConcurrencyConflict,
                                ));
                            }
                            continue;
                        }
                        Err(err) => {
                            pending.mark_failed(err.to_string());
                            self.storage.persist_transaction(pending.clone()).await?;
                            return Ok(pending);
                        }
                    }
                }
                Err(err) => {
                    pending.mark_failed(err.to_string());
                    self.storage.persist_transaction(pending.clone()).await?;
                    return Ok(pending);
                }
            }
        }
        unreachable!("loop always returns within MAX_COMMIT_ATTEMPTS")
    }

    /// Applies the per-operation effect to freshly-reloaded, in-memory
    /// account copies, returning the mutated accounts to stage. Returns
    /// early (without mutating storage) on any business-rule or not-found
    /// failure; the caller turns that into a `Failed` transaction.
    async fn try_apply(&self, pending: &Transaction) -> Result<Vec<Account>, EngineError> {
        match pending.operation_type {
            OperationType::Credit => {
                let mut account = self.reload(pending.account_id).await?;
                account.add_credit(pending.amount)?;
                Ok(vec![account])
            }
            OperationType::Debit => {
                let mut account = self.reload(pending.account_id).await?;
                account.debit(pending.amount)?;
                Ok(vec![account])
            }
            OperationType::Reserve => {
                let mut account = self.reload(pending.account_id).await?;
                account.reserve(pending.amount)?;
                Ok(vec![account])
            }
            OperationType::Capture => {
                let mut account = self.reload(pending.account_id).await?;
                account.capture(pending.amount)?;
                Ok(vec![account])
            }
            OperationType::Transfer => {
                let mut source = self.reload(pending.account_id).await?;
                let mut target = self
                    .reload(
                        pending
                            .target_account_id
                            .expect("transfer transaction always carries a target"),
                    )
                    .await?;
                source.debit(pending.amount)?;
                target.add_credit(pending.amount)?;
                Ok(vec![source, target])
            }
            OperationType::Reversal => self.apply_reversal(pending).await,
        }
    }

    async fn apply_reversal(&self, pending: &Transaction) -> Result<Vec<Account>, EngineError> {
        let original_id = pending
            .original_transaction_id
            .expect("reversal transaction always carries an original id");
        let mut original = self
            .storage
            .get_transaction(original_id)
            .await?
            .ok_or_else(|| EngineError::original_transaction_not_found(original_id))?;

        if original.status == TransactionStatus::Reversed {
            return Err(BusinessRuleError::AlreadyReversed.into());
        }
        if original.status != TransactionStatus::Completed {
            return Err(EngineError::Validation(format!(
                "original transaction {original_id} is not completed"
            )));
        }

        let amount = original.amount;
        let accounts = match original.operation_type {
            OperationType::Credit => {
                let mut account = self.reload(original.account_id).await?;
                account.debit(amount)?;
                vec![account]
            }
            OperationType::Debit => {
                let mut account = self.reload(original.account_id).await?;
                account.add_credit(amount)?;
                vec![account]
            }
            OperationType::Reserve => {
                let mut account = self.reload(original.account_id).await?;
                account.release_reservation(amount)?;
                vec![account]
            }
            OperationType::Capture => {
                // Restores the prior reserved balance as well as the debited
                // balance. If the reserve was independently mutated after
                // the original capture, this can over- or under-restore it.
                let mut account = self.reload(original.account_id).await?;
                account.add_credit(amount)?;
                account.reserve(amount)?;
                vec![account]
            }
            OperationType::Transfer => {
                let mut source = self.reload(original.account_id).await?;
                let mut target = self
                    .reload(
                        original
                            .target_account_id
                            .expect("original transfer always carries a target"),
                    )
                    .await?;
                target.debit(amount)?;
                source.add_credit(amount)?;
                vec![source, target]
            }
            OperationType::Reversal => return Err(BusinessRuleError::NonReversible.into()),
        };

        original.mark_reversed()?;
        self.storage.persist_transaction(original).await?;
        Ok(accounts)
    }

    async fn reload(&self, id: AccountId) -> Result<Account, EngineError> {
        self.storage
            .get_account(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("account {id} not found")))
    }

    /// Resolves `raw` as an opaque id first, then as an external identity,
    /// creating a fresh Active account with zero credit limit if neither
    /// matches. Aborts only if `raw` parses as an opaque id but no such
    /// account exists.
    async fn resolve_or_create_account(&self, raw: &str) -> Result<Account, EngineError> {
        if let Ok(uuid) = Uuid::parse_str(raw) {
            return self
                .storage
                .get_account(AccountId(uuid))
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("account {raw} not found")));
        }
        if let Some(account) = self.storage.get_account_by_external_id(raw).await? {
            return Ok(account);
        }
        let fresh = Account::new(AccountId::new(), Some(raw.to_string()), Money::ZERO);
        self.storage.insert_account(fresh).await
    }

    /// Resolves `raw` as an opaque id or external identity without creating
    /// anything; used for the Transfer target, which must already exist.
    async fn resolve_existing_account(&self, raw: &str) -> Result<Account, EngineError> {
        if let Ok(uuid) = Uuid::parse_str(raw) {
            return self
                .storage
                .get_account(AccountId(uuid))
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("target account {raw} not found")));
        }
        self.storage
            .get_account_by_external_id(raw)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("target account {raw} not found")))
    }

    /// Builds the response projection for a transaction, reading the
    /// current balances of its primary account.
    async fn project(&self, txn: &Transaction) -> Result<ProcessTransactionResponse, EngineError> {
        let account = self.reload(txn.account_id).await?;
        Ok(ProcessTransactionResponse::new(
            txn.id.to_string(),
            txn.status,
            account.balance,
            account.reserved_balance,
            txn.timestamp,
            txn.error_message.clone(),
        ))
    }
}
