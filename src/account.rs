//! The account aggregate: balance/reserved/credit-limit invariants.
//!
//! The aggregate is ignorant of persistence -- it only enforces invariants on
//! in-memory state. The [`crate::storage`] facade is what gives it a
//! concurrency token and a durable home.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BusinessRuleError, EngineError};
use crate::money::Money;

/// The opaque identity of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        AccountId(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Mutating operations may succeed.
    Active,
    /// No mutating operation may succeed.
    Suspended,
    /// Terminal; no mutating operation may succeed.
    Closed,
}

/// The balance aggregate for a single account.
///
/// `balance` may go negative, but only within `credit_limit` once
/// `reserved_balance` is accounted for (see [`Account::debit`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Opaque unique identity.
    pub id: AccountId,
    /// Optional external identity, unique where present.
    pub external_id: Option<String>,
    /// Current balance, signed.
    pub balance: Money,
    /// Funds held against a future capture. Always `>= 0`.
    pub reserved_balance: Money,
    /// The overdraft allowance for `debit`/`transfer`. Always `>= 0`.
    pub credit_limit: Money,
    /// Lifecycle state.
    pub status: AccountStatus,
    /// Optimistic-concurrency token, advanced by the storage facade on every
    /// persisted mutation. The aggregate never advances this itself.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Creates a fresh, active account with zero balances and the given
    /// credit limit.
    #[must_use]
    pub fn new(id: AccountId, external_id: Option<String>, credit_limit: Money) -> Self {
        let now = Utc::now();
        Account {
            id,
            external_id,
            balance: Money::ZERO,
            reserved_balance: Money::ZERO,
            credit_limit,
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `balance - reserved_balance`: the amount freely spendable without
    /// touching credit.
    #[must_use]
    pub fn available_balance(&self) -> Money {
        self.balance - self.reserved_balance
    }

    fn require_active(&self) -> Result<(), EngineError> {
        if self.status != AccountStatus::Active {
            return Err(BusinessRuleError::AccountNotActive.into());
        }
        Ok(())
    }

    fn require_positive(amount: Money) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Err(EngineError::Validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// `balance += amount`. No precondition beyond positivity and active
    /// status.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `amount` is not positive, or
    /// `BusinessRule(AccountNotActive)` if the account is not `Active`.
    pub fn add_credit(&mut self, amount: Money) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.require_active()?;
        self.balance = self.balance + amount;
        self.touch();
        Ok(())
    }

    /// `balance -= amount`, rejecting if it would drive debit capacity
    /// (`balance + credit_limit - reserved_balance`) negative.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `amount` is not positive,
    /// `BusinessRule(AccountNotActive)` if the account is not `Active`, or
    /// `BusinessRule(InsufficientFunds)` if `amount` exceeds debit capacity.
    pub fn debit(&mut self, amount: Money) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.require_active()?;
        let capacity = self.available_balance() + self.credit_limit;
        if amount > capacity {
            return Err(BusinessRuleError::InsufficientFunds.into());
        }
        self.balance = self.balance - amount;
        self.touch();
        Ok(())
    }

    /// `reserved_balance += amount`, rejecting if it would exceed the
    /// available balance.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `amount` is not positive,
    /// `BusinessRule(AccountNotActive)` if the account is not `Active`, or
    /// `BusinessRule(InsufficientAvailable)` if `amount` exceeds the
    /// available balance.
    pub fn reserve(&mut self, amount: Money) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.require_active()?;
        if amount > self.available_balance() {
            return Err(BusinessRuleError::InsufficientAvailable.into());
        }
        self.reserved_balance = self.reserved_balance + amount;
        self.touch();
        Ok(())
    }

    /// `reserved_balance -= amount; balance -= amount`, rejecting if
    /// `amount` exceeds `reserved_balance`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `amount` is not positive,
    /// `BusinessRule(AccountNotActive)` if the account is not `Active`, or
    /// `BusinessRule(InsufficientReserved)` if `amount` exceeds
    /// `reserved_balance`.
    pub fn capture(&mut self, amount: Money) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.require_active()?;
        if amount > self.reserved_balance {
            return Err(BusinessRuleError::InsufficientReserved.into());
        }
        self.reserved_balance = self.reserved_balance - amount;
        self.balance = self.balance - amount;
        self.touch();
        Ok(())
    }

    /// `reserved_balance -= amount`, rejecting if `amount` exceeds
    /// `reserved_balance`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `amount` is not positive,
    /// `BusinessRule(AccountNotActive)` if the account is not `Active`, or
    /// `BusinessRule(InvalidReservation)` if `amount` exceeds
    /// `reserved_balance`.
    pub fn release_reservation(&mut self, amount: Money) -> Result<(), EngineError> {
        Self::require_positive(amount)?;
        self.require_active()?;
        if amount > self.reserved_balance {
            return Err(BusinessRuleError::InvalidReservation.into());
        }
        self.reserved_balance = self.reserved_balance - amount;
        self.touch();
        Ok(())
    }
}
