//! The points ledger: balances, append-only history and award markers.
//!
//! [`Ledger`] is the only writer of balances. It wraps a [`LedgerStore`]
//! backend, times and counts every operation, and publishes a notification
//! once a mutation has committed. Credits and debits live in [`mutator`],
//! read-side operations in [`query`], and the idempotent award wrapper in
//! [`guard`].

pub mod error;
pub mod guard;
pub mod interface;
pub mod memory;
pub mod mutator;
pub mod notifier;
pub mod query;
pub mod recorder;

use {
    crate::{
        ledger::{
            error::LedgerError,
            interface::LedgerStore,
            memory::MemoryStore,
            notifier::{Notifier, PointsNotification},
        },
        measure,
        metrics::{
            APPEND_TIME_SECONDS, GET_BALANCE_TIME_SECONDS, POINTS_CREDITED_TOTAL,
            POINTS_DEBITED_TOTAL, STORAGE_ERRORS_TOTAL, TRANSACTIONS_RECORDED_TOTAL,
        },
        models::{NewEntry, Points, Reference, Transaction, TransactionId, UserId},
    },
    rust_decimal::{Decimal, prelude::ToPrimitive},
    std::sync::Arc,
    tokio::sync::broadcast,
    tracing::{debug, error},
};

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    notifier: Notifier,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Notifier::new(1024))
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Notifier) -> Self {
        Ledger { store, notifier }
    }

    /// Balance of `user_id`; zero for accounts that never transacted.
    pub fn get_balance(&self, user_id: UserId) -> Result<Points, LedgerError> {
        measure!(GET_BALANCE_TIME_SECONDS, {
            self.store.get_balance(user_id).inspect_err(report_storage)
        })
    }

    /// Receives a `points_added` / `points_subtracted` notification per committed mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<PointsNotification> {
        self.notifier.subscribe()
    }

    /// Transaction that claimed `reference`, if it has been awarded.
    pub fn find_award(&self, reference: &Reference) -> Result<Option<TransactionId>, LedgerError> {
        self.store.find_award(reference).inspect_err(report_storage)
    }

    /// The single write path. Everything that changes a balance goes through here.
    pub(crate) fn append(&self, entry: NewEntry) -> Result<Transaction, LedgerError> {
        let transaction = measure!(APPEND_TIME_SECONDS, {
            self.store.append(entry).inspect_err(report_storage)?
        });

        TRANSACTIONS_RECORDED_TOTAL.inc();
        let magnitude = transaction.delta.abs().to_f64().unwrap_or_default();
        if transaction.delta > Decimal::ZERO {
            POINTS_CREDITED_TOTAL.inc_by(magnitude);
        } else {
            POINTS_DEBITED_TOTAL.inc_by(magnitude);
        }

        debug!(
            "Recorded transaction {} for user {}: {} {} -> {}",
            transaction.id,
            transaction.user_id,
            transaction.kind,
            transaction.delta,
            transaction.balance_after
        );

        self.notifier.publish(&transaction);

        Ok(transaction)
    }
}

fn report_storage(error: &LedgerError) {
    if let LedgerError::Storage(storage_error) = error {
        STORAGE_ERRORS_TOTAL.inc();
        error!("Ledger storage failure: {}", storage_error);
    }
}
