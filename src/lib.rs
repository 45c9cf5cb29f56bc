//! A transaction-processing engine for a financial ledger.
//!
//! Clients submit typed money-movement operations (credit, debit, reserve,
//! capture, transfer, reversal) identified by a client-supplied reference,
//! and the engine returns the authoritative post-operation balances of the
//! affected account(s). Idempotency on the reference, per-account mutual
//! exclusion, atomic storage commits, and at-least-once event emission are
//! all guaranteed by the [`engine::TransactionEngine`].
//!
//! HTTP routing, authentication and user management live outside this crate;
//! it exposes only the pieces an outer service needs to build on top of it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Account aggregate: balance/reserved/credit-limit invariants.
pub mod account;
/// The transaction engine orchestrator.
pub mod engine;
/// The error taxonomy shared across every component.
pub mod errors;
/// The in-process, multi-producer/multi-consumer domain event queue.
pub mod events;
/// Per-account advisory locking with deadlock-free multi-account acquisition.
pub mod locks;
/// Fixed-point integer money, minor units throughout.
pub mod money;
/// The storage transaction facade and its in-memory reference implementation.
pub mod storage;
/// The transaction record and its lifecycle.
pub mod transaction;
/// Wire-format request/response DTOs.
pub mod wire;

pub use account::{Account, AccountId, AccountStatus};
pub use engine::TransactionEngine;
pub use errors::{BusinessRuleError, EngineError};
pub use money::Money;
pub use transaction::{OperationType, Transaction, TransactionId, TransactionStatus};
