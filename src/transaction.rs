//! The transaction record and its lifecycle.
//!
//! Construction validates the linkage between operation type and the
//! accounts/references it carries. The three state transitions are each
//! guarded so that no other transition is ever reachable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::AccountId;
use crate::errors::EngineError;
use crate::money::Money;

/// The opaque identity of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation a transaction requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Unconditional credit to an account.
    Credit,
    /// Debit within available balance + credit limit.
    Debit,
    /// Hold funds against a future capture.
    Reserve,
    /// Convert a reservation into a debit.
    Capture,
    /// Move funds from one account to another.
    Transfer,
    /// Undo a prior completed transaction.
    Reversal,
}

impl OperationType {
    /// Case-insensitive parse from the fixed wire vocabulary.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.to_ascii_lowercase().as_str() {
            "credit" => Ok(OperationType::Credit),
            "debit" => Ok(OperationType::Debit),
            "reserve" => Ok(OperationType::Reserve),
            "capture" => Ok(OperationType::Capture),
            "transfer" => Ok(OperationType::Transfer),
            "reversal" => Ok(OperationType::Reversal),
            other => Err(EngineError::Validation(format!(
                "unknown operation '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Credit => "credit",
            OperationType::Debit => "debit",
            OperationType::Reserve => "reserve",
            OperationType::Capture => "capture",
            OperationType::Transfer => "transfer",
            OperationType::Reversal => "reversal",
        };
        write!(f, "{s}")
    }
}

/// The status of a transaction record.
///
/// `Pending` -> `Completed` | `Failed`; `Completed` -> `Reversed` (only via a
/// completed `Reversal` transaction targeting it). No other transition is
/// legal; `Failed` and `Reversed` are terminal with respect to self-initiated
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Persisted, not yet resolved.
    Pending,
    /// The engine committed the mutation.
    Completed,
    /// The engine rolled back; `error_message` carries why.
    Failed,
    /// A `Reversal` transaction targeting this one has completed.
    Reversed,
}

/// The request/outcome record for one `ProcessTransaction` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque identity.
    pub id: TransactionId,
    /// Client-supplied reference, globally unique across all transactions.
    pub reference_id: String,
    /// The requested operation.
    pub operation_type: OperationType,
    /// Amount, always positive, in minor units.
    pub amount: Money,
    /// The primary account this transaction acts on.
    pub account_id: AccountId,
    /// The destination account; required for `Transfer`.
    pub target_account_id: Option<AccountId>,
    /// The transaction a `Reversal` undoes; required for `Reversal`.
    pub original_transaction_id: Option<TransactionId>,
    /// Free-form client-supplied metadata.
    pub metadata: Option<String>,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle state.
    pub status: TransactionStatus,
    /// Populated when `status == Failed`.
    pub error_message: Option<String>,
}

impl Transaction {
    /// Constructs a new `Pending` transaction, validating the linkage
    /// invariants: non-empty `reference_id`, positive `amount`,
    /// `Transfer => target_account_id`, `Reversal => original_transaction_id`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `reference_id` is empty, `amount` is not
    /// positive, a `Transfer` is missing `target_account_id`, or a
    /// `Reversal` is missing `original_transaction_id`.
    pub fn new(
        reference_id: String,
        operation_type: OperationType,
        amount: Money,
        account_id: AccountId,
        target_account_id: Option<AccountId>,
        original_transaction_id: Option<TransactionId>,
        metadata: Option<String>,
    ) -> Result<Self, EngineError> {
        if reference_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "reference_id must not be empty".to_string(),
            ));
        }
        if !amount.is_positive() {
            return Err(EngineError::Validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        if operation_type == OperationType::Transfer && target_account_id.is_none() {
            return Err(EngineError::missing_target_account(operation_type));
        }
        if operation_type == OperationType::Reversal && original_transaction_id.is_none() {
            return Err(EngineError::Validation(
                "reversal requires original_transaction_id".to_string(),
            ));
        }

        Ok(Transaction {
            id: TransactionId::new(),
            reference_id,
            operation_type,
            amount,
            account_id,
            target_account_id,
            original_transaction_id,
            metadata,
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
            error_message: None,
        })
    }

    /// `Pending -> Completed`. Panics (via `debug_assert`) if called from any
    /// other state -- the engine never calls this except from `Pending`.
    pub fn mark_completed(&mut self) {
        debug_assert_eq!(self.status, TransactionStatus::Pending);
        self.status = TransactionStatus::Completed;
    }

    /// `Pending -> Failed`, recording `reason`.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        debug_assert_eq!(self.status, TransactionStatus::Pending);
        self.status = TransactionStatus::Failed;
        self.error_message = Some(reason.into());
    }

    /// `Completed -> Reversed`. Only legal from `Completed`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the transaction is not currently `Completed`.
    pub fn mark_reversed(&mut self) -> Result<(), EngineError> {
        if self.status != TransactionStatus::Completed {
            return Err(EngineError::Validation(format!(
                "cannot mark {:?} transaction as reversed",
                self.status
            )));
        }
        self.status = TransactionStatus::Reversed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_requires_target() {
        let err = Transaction::new(
            "ref-1".to_string(),
            OperationType::Transfer,
            Money::from_minor_units(100),
            AccountId::new(),
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn reversal_requires_original() {
        let err = Transaction::new(
            "ref-2".to_string(),
            OperationType::Reversal,
            Money::from_minor_units(100),
            AccountId::new(),
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn lifecycle_completed_to_reversed() {
        let mut txn = Transaction::new(
            "ref-3".to_string(),
            OperationType::Credit,
            Money::from_minor_units(100),
            AccountId::new(),
            None,
            None,
            None,
        )
        .unwrap();
        txn.mark_completed();
        assert_eq!(txn.status, TransactionStatus::Completed);
        txn.mark_reversed().unwrap();
        assert_eq!(txn.status, TransactionStatus::Reversed);
    }

    #[test]
    fn failed_is_terminal() {
        let mut txn = Transaction::new(
            "ref-4".to_string(),
            OperationType::Credit,
            Money::from_minor_units(100),
            AccountId::new(),
            None,
            None,
            None,
        )
        .unwrap();
        txn.mark_failed("insufficient funds");
        assert!(txn.mark_reversed().is_err());
    }

    #[test]
    fn operation_parse_is_case_insensitive() {
        assert_eq!(OperationType::parse("CREDIT").unwrap(), OperationType::Credit);
        assert_eq!(OperationType::parse("Reversal").unwrap(), OperationType::Reversal);
        assert!(OperationType::parse("yeet").is_err());
    }
}
