//! In-memory ledger store.
//!
//! Each account lives in its own `DashMap` slot, so mutations on one account
//! hold that slot's lock for the whole read-modify-append while other accounts
//! proceed in parallel. Award markers sit in a second map and are always
//! locked after the account, never before.

use {
    crate::{
        ledger::{
            error::{LedgerError, StorageError},
            interface::LedgerStore,
            recorder::{AccountHead, record, settle},
        },
        models::{
            AuditReport, NewEntry, Points, Reference, Statistics, Transaction, TransactionId,
            UserId,
        },
    },
    chrono::{DateTime, Utc},
    dashmap::{DashMap, mapref::entry::Entry},
    rust_decimal::Decimal,
    std::sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

#[derive(Debug, Default)]
struct Account {
    head: AccountHead,
    // Oldest first.
    history: Vec<Transaction>,
}

pub struct MemoryStore {
    accounts: DashMap<UserId, Account>,
    awards: DashMap<Reference, TransactionId>,
    next_id: AtomicU64,
    // Appends share it; statistics takes it exclusively to read a snapshot.
    snapshot: RwLock<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            accounts: DashMap::new(),
            awards: DashMap::new(),
            next_id: AtomicU64::new(1),
            snapshot: RwLock::new(()),
        }
    }

    fn commit(&self, account: &mut Account, entry: NewEntry) -> Result<Transaction, LedgerError> {
        let marker = if entry.claims_award {
            let reference = entry.reference.clone().ok_or_else(|| {
                StorageError::Corrupted("award claimed without a reference".to_string())
            })?;

            match self.awards.entry(reference) {
                Entry::Occupied(existing) => {
                    return Err(LedgerError::DuplicateAward {
                        reference: existing.key().clone(),
                        transaction_id: *existing.get(),
                    });
                }
                Entry::Vacant(vacant) => Some(vacant),
            }
        } else {
            None
        };

        settle(&account.head, entry.delta)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let transaction = record(&account.head, id, entry, Utc::now())?;

        if let Some(marker) = marker {
            marker.insert(transaction.id);
        }
        account.head.advance(&transaction);
        account.history.push(transaction.clone());

        Ok(transaction)
    }
}

impl LedgerStore for MemoryStore {
    fn get_balance(&self, user_id: UserId) -> Result<Points, LedgerError> {
        Ok(self
            .accounts
            .get(&user_id)
            .map(|account| account.head.balance)
            .unwrap_or(Decimal::ZERO))
    }

    fn append(&self, entry: NewEntry) -> Result<Transaction, LedgerError> {
        let _shared = self
            .snapshot
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;

        match self.accounts.entry(entry.user_id) {
            Entry::Occupied(mut occupied) => self.commit(occupied.get_mut(), entry),
            Entry::Vacant(vacant) => {
                // Accounts only come into existence with their first committed record.
                let mut account = Account::default();
                let transaction = self.commit(&mut account, entry)?;
                vacant.insert(account);
                Ok(transaction)
            }
        }
    }

    fn find_award(&self, reference: &Reference) -> Result<Option<TransactionId>, LedgerError> {
        Ok(self.awards.get(reference).map(|entry| *entry.value()))
    }

    fn history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let Some(account) = self.accounts.get(&user_id) else {
            return Ok(Vec::new());
        };

        Ok(account
            .history
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn statistics(&self, since: DateTime<Utc>) -> Result<Statistics, LedgerError> {
        let _exclusive = self
            .snapshot
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut total_points = Decimal::ZERO;
        let mut accounts = 0u64;
        let mut transactions_today = 0u64;

        for account in self.accounts.iter() {
            let balance = account.head.balance;
            total_points = total_points
                .checked_add(balance)
                .ok_or(LedgerError::AmountOutOfRange { amount: balance })?;
            accounts += 1;
            transactions_today += account
                .history
                .iter()
                .rev()
                .take_while(|transaction| transaction.created_at >= since)
                .count() as u64;
        }

        Ok(Statistics::from_totals(
            total_points,
            accounts,
            transactions_today,
        ))
    }

    fn audit(&self, user_id: UserId) -> Result<AuditReport, LedgerError> {
        Ok(match self.accounts.get(&user_id) {
            Some(account) => AuditReport::replay(user_id, account.head.balance, &account.history),
            None => AuditReport::replay(user_id, Decimal::ZERO, &[]),
        })
    }
}
