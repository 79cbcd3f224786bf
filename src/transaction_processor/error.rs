use {
    crate::{ledger::error::LedgerError, models::Points},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum TransactionProcessorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("invalid line item for product {product_id}: {reason}")]
    InvalidLineItem { product_id: u64, reason: String },
}

impl TransactionProcessorError {
    /// Points missing to cover a rejected debit, if that is why it failed.
    pub fn shortage(&self) -> Option<Points> {
        match self {
            TransactionProcessorError::Ledger(LedgerError::InsufficientBalance {
                shortage, ..
            }) => Some(*shortage),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionProcessorError::Ledger(e) if e.is_retryable())
    }
}
