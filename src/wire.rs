//! Wire-format DTOs: snake_case JSON, amounts always integer minor units.
//!
//! These are kept separate from the domain types: the engine's internal
//! types never derive their `Serialize` impl from what happens to be
//! convenient on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::transaction::TransactionStatus;

/// A `ProcessTransaction` request, exactly as it arrives over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTransactionRequest {
    /// One of "credit", "debit", "reserve", "capture", "transfer",
    /// "reversal" (case-insensitive).
    pub operation: String,
    /// Opaque account id, or an external identity if it doesn't parse as one.
    pub account_id: String,
    /// Integer minor units (cents). Must be positive.
    pub amount: i64,
    /// Echoed, never converted.
    pub currency: String,
    /// Client-chosen idempotency key, globally unique.
    pub reference_id: String,
    /// Required for `transfer`.
    #[serde(default)]
    pub target_account_id: Option<String>,
    /// Required for `reversal`.
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    /// Free-form client metadata.
    #[serde(default)]
    pub metadata: Option<String>,
}

/// The wire-level status of a `ProcessTransaction` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    /// Maps from `TransactionStatus::Completed` and `::Reversed`: a
    /// `Reversed` transaction is a success-terminal state, not "pending".
    Success,
    /// Maps from `TransactionStatus::Failed`.
    Failed,
    /// Maps from `TransactionStatus::Pending`.
    Pending,
}

impl From<TransactionStatus> for WireStatus {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Completed | TransactionStatus::Reversed => WireStatus::Success,
            TransactionStatus::Failed => WireStatus::Failed,
            TransactionStatus::Pending => WireStatus::Pending,
        }
    }
}

/// A `ProcessTransaction` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTransactionResponse {
    /// The transaction id, stable across idempotent replays.
    pub transaction_id: String,
    /// "success" | "failed" | "pending".
    pub status: WireStatus,
    /// Post-operation balance, minor units.
    pub balance: i64,
    /// Post-operation reserved balance, minor units.
    pub reserved_balance: i64,
    /// Post-operation available balance, minor units.
    pub available_balance: i64,
    /// When the transaction was created.
    pub timestamp: DateTime<Utc>,
    /// Populated when `status == "failed"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProcessTransactionResponse {
    /// Builds a response from the raw pieces the engine has in hand after
    /// processing, converting `Money` to the wire's plain integers.
    #[must_use]
    pub fn new(
        transaction_id: String,
        status: TransactionStatus,
        balance: Money,
        reserved_balance: Money,
        timestamp: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Self {
        ProcessTransactionResponse {
            transaction_id,
            status: status.into(),
            balance: balance.minor_units(),
            reserved_balance: reserved_balance.minor_units(),
            available_balance: (balance - reserved_balance).minor_units(),
            timestamp,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_maps_to_success() {
        assert_eq!(WireStatus::from(TransactionStatus::Reversed), WireStatus::Success);
    }

    #[test]
    fn request_round_trips_through_json() {
        let raw = r#"{
            "operation": "credit",
            "account_id": "11111111-1111-1111-1111-111111111111",
            "amount": 100000,
            "currency": "USD",
            "reference_id": "TXN-42"
        }"#;
        let req: ProcessTransactionRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.operation, "credit");
        assert_eq!(req.amount, 100_000);
        assert!(req.target_account_id.is_none());
    }
}
