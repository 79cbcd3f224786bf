use {
    crate::{
        ledger::error::LedgerError,
        models::{
            AuditReport, NewEntry, Points, Reference, Statistics, Transaction, TransactionId,
            UserId,
        },
    },
    chrono::{DateTime, Utc},
};

/// Storage contract for balances, history and award markers.
///
/// Implementations serialize mutations per account and never expose partial
/// state: a failed `append` leaves balance, history and markers untouched.
pub trait LedgerStore: Send + Sync {
    /// Current balance; zero for an account that has never transacted.
    fn get_balance(&self, user_id: UserId) -> Result<Points, LedgerError>;

    /// Atomically reads the balance, applies `entry.delta`, appends the record
    /// and, when `entry.claims_award` is set, writes the award marker.
    ///
    /// Fails with `InsufficientBalance` if the balance would go negative and
    /// with `DuplicateAward` if the marker already exists.
    fn append(&self, entry: NewEntry) -> Result<Transaction, LedgerError>;

    /// Transaction that claimed `reference`, if any.
    fn find_award(&self, reference: &Reference) -> Result<Option<TransactionId>, LedgerError>;

    /// Newest first.
    fn history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>, LedgerError>;

    /// Aggregates over one consistent snapshot. `since` bounds the
    /// transactions counted as "today".
    fn statistics(&self, since: DateTime<Utc>) -> Result<Statistics, LedgerError>;

    /// Replays the full history of an account against its cached balance.
    fn audit(&self, user_id: UserId) -> Result<AuditReport, LedgerError>;
}
