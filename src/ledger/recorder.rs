//! Builds transaction records from an account's current head.
//!
//! Stores call [`settle`] inside their critical section and only allocate an
//! id once it succeeds, so rejected mutations never consume one.

use {
    crate::{
        ledger::error::LedgerError,
        models::{NewEntry, Points, Transaction, TransactionId},
    },
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
};

/// Last known state of an account, read under the account's lock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccountHead {
    pub balance: Points,
    pub last_transaction_id: Option<TransactionId>,
}

/// Balance after applying `delta`, or why it cannot be applied.
pub fn settle(head: &AccountHead, delta: Points) -> Result<Points, LedgerError> {
    if delta.is_zero() {
        return Err(LedgerError::InvalidAmount { amount: delta });
    }

    let balance_after = head
        .balance
        .checked_add(delta)
        .ok_or(LedgerError::AmountOutOfRange { amount: delta })?;
    if balance_after < Decimal::ZERO {
        return Err(LedgerError::InsufficientBalance {
            balance: head.balance,
            shortage: -balance_after,
        });
    }

    Ok(balance_after)
}

pub fn record(
    head: &AccountHead,
    id: TransactionId,
    entry: NewEntry,
    created_at: DateTime<Utc>,
) -> Result<Transaction, LedgerError> {
    let balance_after = settle(head, entry.delta)?;

    Ok(Transaction {
        id,
        user_id: entry.user_id,
        delta: entry.delta,
        kind: entry.kind,
        reference: entry.reference,
        balance_before: head.balance,
        balance_after,
        note: entry.note,
        created_at,
    })
}

impl AccountHead {
    pub fn advance(&mut self, transaction: &Transaction) {
        self.balance = transaction.balance_after;
        self.last_transaction_id = Some(transaction.id);
    }
}
