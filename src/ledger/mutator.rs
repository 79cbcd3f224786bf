//! Credits and debits.
//!
//! Amounts are validated before any storage access. The store serializes
//! mutations per account, so a debit can never be approved against a stale
//! balance.

use {
    crate::{
        ledger::{Ledger, error::LedgerError, guard::Claim},
        metrics::INSUFFICIENT_BALANCE_TOTAL,
        models::{NewEntry, Points, Reference, Transaction, TransactionType, UserId, normalize},
    },
    rust_decimal::Decimal,
    tracing::info,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PointsRequest {
    pub user_id: UserId,
    pub amount: Points,
    pub kind: TransactionType,
    pub reference: Option<Reference>,
    pub note: Option<String>,
    claims_award: bool,
}

impl PointsRequest {
    pub fn new(user_id: UserId, amount: Points, kind: TransactionType) -> Self {
        PointsRequest {
            user_id,
            amount,
            kind,
            reference: None,
            note: None,
            claims_award: false,
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Empty notes are replaced by the transaction type's default note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Ties the request to an award claim handed out by the idempotency guard.
    pub fn claiming(mut self, claim: Claim) -> Self {
        self.reference = Some(claim.into_reference());
        self.claims_award = true;
        self
    }

    fn into_entry(self, delta: Points) -> NewEntry {
        let note = match self.note {
            Some(note) if !note.trim().is_empty() => note,
            _ => self.kind.default_note().to_string(),
        };

        NewEntry {
            user_id: self.user_id,
            delta,
            kind: self.kind,
            reference: self.reference,
            note,
            claims_award: self.claims_award,
        }
    }
}

fn validated(amount: Points) -> Result<Points, LedgerError> {
    let amount = normalize(amount);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(amount)
}

impl Ledger {
    /// Adds `request.amount` to the account, opening it if needed.
    pub fn credit(&self, request: PointsRequest) -> Result<Transaction, LedgerError> {
        let amount = validated(request.amount)?;
        self.append(request.into_entry(amount))
    }

    /// Removes `request.amount`, failing with `InsufficientBalance` instead of
    /// ever taking the account below zero.
    pub fn debit(&self, request: PointsRequest) -> Result<Transaction, LedgerError> {
        let amount = validated(request.amount)?;
        let user_id = request.user_id;

        self.append(request.into_entry(-amount)).inspect_err(|e| {
            if let LedgerError::InsufficientBalance { balance, shortage } = e {
                INSUFFICIENT_BALANCE_TOTAL.inc();
                info!(
                    "Rejected debit of {} for user {}: balance {}, short by {}",
                    amount, user_id, balance, shortage
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_utils::{TempDb, memory_ledger, sqlite_ledger},
        rust_decimal_macros::dec,
        std::thread,
    };

    fn manual(user_id: UserId, amount: Points) -> PointsRequest {
        PointsRequest::new(user_id, amount, TransactionType::Manual)
    }

    #[test]
    fn test_credit_records_before_and_after() {
        let ledger = memory_ledger();
        ledger.credit(manual(1, dec!(500))).unwrap();

        let transaction = ledger
            .credit(manual(1, dec!(100)).with_note("bonus"))
            .unwrap();

        assert_eq!(transaction.kind, TransactionType::Manual);
        assert_eq!(transaction.delta, dec!(100));
        assert_eq!(transaction.balance_before, dec!(500));
        assert_eq!(transaction.balance_after, dec!(600));
        assert_eq!(transaction.note, "bonus");
    }

    #[test]
    fn test_missing_note_uses_default() {
        let ledger = memory_ledger();
        let transaction = ledger.credit(manual(1, dec!(1)).with_note("  ")).unwrap();
        assert_eq!(transaction.note, "Manual adjustment");
    }

    #[test]
    fn test_non_positive_amounts_are_rejected() {
        let ledger = memory_ledger();
        for amount in [dec!(0), dec!(-5), dec!(0.00001)] {
            assert!(matches!(
                ledger.credit(manual(1, amount)),
                Err(LedgerError::InvalidAmount { .. })
            ));
            assert!(matches!(
                ledger.debit(manual(1, amount)),
                Err(LedgerError::InvalidAmount { .. })
            ));
        }
        assert!(ledger.history(1, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_debit_beyond_balance_reports_shortage() {
        let ledger = memory_ledger();
        ledger.credit(manual(1, dec!(500))).unwrap();

        let result = ledger.debit(PointsRequest::new(1, dec!(700), TransactionType::Purchase));

        match result {
            Err(LedgerError::InsufficientBalance { shortage, .. }) => {
                assert_eq!(shortage, dec!(200))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(ledger.get_balance(1).unwrap(), dec!(500));
    }

    #[test]
    fn test_debit_of_exact_balance_empties_account() {
        let ledger = memory_ledger();
        ledger.credit(manual(1, dec!(12.75))).unwrap();
        let transaction = ledger.debit(manual(1, dec!(12.75))).unwrap();
        assert_eq!(transaction.balance_after, dec!(0));
    }

    fn concurrent_credits(ledger: &Ledger) {
        ledger.credit(manual(1, dec!(10))).unwrap();

        thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        ledger.credit(manual(1, dec!(2.5))).unwrap();
                    }
                });
            }
        });

        assert_eq!(ledger.get_balance(1).unwrap(), dec!(410));
        assert_eq!(ledger.history(1, 1000, 0).unwrap().len(), 161);
        assert!(ledger.audit(1).unwrap().is_consistent());
    }

    fn concurrent_debits(ledger: &Ledger) {
        ledger.credit(manual(1, dec!(100))).unwrap();

        let outcomes: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..12)
                .map(|_| scope.spawn(|| ledger.debit(manual(1, dec!(30)))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let approved = outcomes.iter().filter(|o| o.is_ok()).count();
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, Err(LedgerError::InsufficientBalance { .. })))
            .count();

        assert_eq!(approved, 3);
        assert_eq!(rejected, 9);
        assert_eq!(ledger.get_balance(1).unwrap(), dec!(10));
        assert!(ledger.audit(1).unwrap().is_consistent());
    }

    #[test]
    fn test_concurrent_credits_lose_no_updates_in_memory() {
        concurrent_credits(&memory_ledger());
    }

    #[test]
    fn test_concurrent_credits_lose_no_updates_in_sqlite() {
        let db = TempDb::new();
        concurrent_credits(&sqlite_ledger(&db));
    }

    #[test]
    fn test_concurrent_debits_never_overdraw_in_memory() {
        concurrent_debits(&memory_ledger());
    }

    #[test]
    fn test_concurrent_debits_never_overdraw_in_sqlite() {
        let db = TempDb::new();
        concurrent_debits(&sqlite_ledger(&db));
    }

    #[test]
    fn test_accounts_are_independent() {
        let ledger = memory_ledger();

        thread::scope(|scope| {
            for user_id in 1..=4u64 {
                let ledger = &ledger;
                scope.spawn(move || {
                    for _ in 0..25 {
                        ledger.credit(manual(user_id, dec!(1))).unwrap();
                    }
                });
            }
        });

        for user_id in 1..=4u64 {
            assert_eq!(ledger.get_balance(user_id).unwrap(), dec!(25));
        }
    }
}
