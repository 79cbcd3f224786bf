use {
    crate::models::{Points, Reference, TransactionId},
    rusqlite::ErrorCode,
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid amount {amount}: must be greater than zero")]
    InvalidAmount { amount: Points },
    #[error("insufficient balance: have {balance}, short by {shortage}")]
    InsufficientBalance { balance: Points, shortage: Points },
    #[error("amount {amount} is outside the representable points range")]
    AmountOutOfRange { amount: Points },
    #[error("{reference} was already awarded by transaction {transaction_id}")]
    DuplicateAward {
        reference: Reference,
        transaction_id: TransactionId,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Only storage failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(rusqlite::Error),
    #[error("timed out waiting for the database")]
    Timeout,
    #[error("a ledger lock was poisoned")]
    LockPoisoned,
    #[error("corrupted ledger data: {0}")]
    Corrupted(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StorageError::Timeout,
            _ => StorageError::Database(error),
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(error: rusqlite::Error) -> Self {
        LedgerError::Storage(error.into())
    }
}
