//! The error taxonomy shared by every component.
//!
//! Mirrors the five-way classification of the engine's design: `Validation`
//! and `NotFound` are synchronous failures raised before any transaction
//! record is persisted; `BusinessRule` is caught inside the locked storage
//! transaction and turned into a `Failed` transaction rather than propagated;
//! `Concurrency` triggers local recovery (reload-and-replay or
//! return-the-winner); `InfrastructureFatal` propagates to the caller.

use crate::transaction::{OperationType, TransactionId};

/// A specific business rule that rejected an operation.
///
/// Kept separate from [`EngineError`] so call sites can match the precise
/// rule without string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusinessRuleError {
    /// `Debit`/`Transfer` source would exceed `available + credit_limit`.
    #[error("insufficient funds")]
    InsufficientFunds,
    /// `Reserve` would exceed `available`.
    #[error("insufficient available balance")]
    InsufficientAvailable,
    /// `Capture` would exceed `reserved_balance`.
    #[error("insufficient reserved balance")]
    InsufficientReserved,
    /// `ReleaseReservation` would exceed `reserved_balance`.
    #[error("invalid reservation release")]
    InvalidReservation,
    /// The account's status is not `Active`.
    #[error("account is not active")]
    AccountNotActive,
    /// A reversal targeted an operation type that cannot be reversed.
    #[error("transaction type is not reversible")]
    NonReversible,
    /// A reversal targeted a transaction that has already been reversed.
    #[error("transaction has already been reversed")]
    AlreadyReversed,
}

/// A concurrency condition the engine recovers from locally rather than
/// surfacing as a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConcurrencyError {
    /// A storage commit touched a row whose optimistic-concurrency token had
    /// already advanced.
    #[error("optimistic concurrency conflict")]
    ConcurrencyConflict,
    /// Two concurrent requests raced on the same `reference_id`; the unique
    /// index accepted exactly one insert.
    #[error("duplicate reference id")]
    DuplicateReference,
}

/// The top-level error type returned by the transaction engine and its
/// collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Malformed request: unknown operation, non-positive amount, missing
    /// required linkage, unparsable id. Raised before any persistence.
    #[error("validation error: {0}")]
    Validation(String),

    /// `account_id` (opaque form) does not exist, `original_transaction_id`
    /// is missing, or `target_account_id` (opaque form) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A named business rule rejected the operation mid-transaction.
    #[error("business rule violated: {0}")]
    BusinessRule(#[from] BusinessRuleError),

    /// A condition resolved by local recovery rather than by failing the
    /// request.
    #[error("concurrency: {0}")]
    Concurrency(#[from] ConcurrencyError),

    /// Storage unreachable, event queue shut down, or another condition the
    /// caller cannot recover from locally.
    #[error("infrastructure failure: {0}")]
    InfrastructureFatal(String),
}

impl EngineError {
    /// Shorthand for the common "original transaction not found" case.
    pub fn original_transaction_not_found(id: TransactionId) -> Self {
        EngineError::NotFound(format!("original transaction {id} not found"))
    }

    /// Shorthand for "this operation type requires a target account".
    pub fn missing_target_account(op: OperationType) -> Self {
        EngineError::Validation(format!("{op} requires target_account_id"))
    }
}
