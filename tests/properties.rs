//! Property tests for invariants 1 and 2 of the testable-properties section:
//! `reserved_balance >= 0` and `balance + credit_limit - reserved_balance >= 0`
//! hold after every operation in any sequence the aggregate accepts.

use ledger_engine::account::{Account, AccountId};
use ledger_engine::money::Money;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Credit(i64),
    Debit(i64),
    Reserve(i64),
    Capture(i64),
    Release(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..=10_000).prop_map(Op::Credit),
        (1i64..=10_000).prop_map(Op::Debit),
        (1i64..=10_000).prop_map(Op::Reserve),
        (1i64..=10_000).prop_map(Op::Capture),
        (1i64..=10_000).prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn invariants_hold_after_any_accepted_sequence(
        credit_limit in 0i64..=50_000,
        ops in prop::collection::vec(op_strategy(), 0..200),
    ) {
        let mut account = Account::new(AccountId::new(), None, Money::from_minor_units(credit_limit));

        for op in ops {
            let _ = match op {
                Op::Credit(v) => account.add_credit(Money::from_minor_units(v)),
                Op::Debit(v) => account.debit(Money::from_minor_units(v)),
                Op::Reserve(v) => account.reserve(Money::from_minor_units(v)),
                Op::Capture(v) => account.capture(Money::from_minor_units(v)),
                Op::Release(v) => account.release_reservation(Money::from_minor_units(v)),
            };

            // Invariant 1: reserved_balance never goes negative, whether the
            // operation above was accepted or rejected.
            prop_assert!(account.reserved_balance >= Money::ZERO);

            // Invariant 2: debit capacity never goes negative.
            let capacity = account.balance + account.credit_limit - account.reserved_balance;
            prop_assert!(capacity >= Money::ZERO);
        }
    }
}
