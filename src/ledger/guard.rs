//! At-most-once awards keyed by an external reference.
//!
//! Attempts for the same reference are serialized on a lock stripe, and the
//! award marker is written by the store in the same atomic unit as the credit.
//! A failed award leaves no marker behind, so it can simply be retried.

use {
    crate::{
        ledger::{
            Ledger,
            error::{LedgerError, StorageError},
        },
        metrics::DUPLICATE_AWARDS_TOTAL,
        models::{Reference, Transaction, TransactionId},
    },
    std::{
        hash::{DefaultHasher, Hash, Hasher},
        sync::{Arc, Mutex},
    },
    tracing::info,
};

const LOCK_STRIPES: usize = 64;

/// Permission to record the award for one reference.
///
/// Only the guard creates claims; pass it to [`crate::ledger::mutator::PointsRequest::claiming`].
#[derive(Debug, PartialEq, Eq)]
pub struct Claim {
    reference: Reference,
}

impl Claim {
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub(crate) fn into_reference(self) -> Reference {
        self.reference
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    Awarded(Transaction),
    /// Nothing to do: `transaction_id` already awarded this reference.
    AlreadyAwarded { transaction_id: TransactionId },
}

pub struct IdempotencyGuard {
    ledger: Arc<Ledger>,
    stripes: Vec<Mutex<()>>,
}

impl IdempotencyGuard {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        IdempotencyGuard {
            ledger,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Runs `award` unless `reference` was already awarded.
    ///
    /// `award` must attach the claim it receives to its credit; otherwise no
    /// marker is written and a later attempt would award again.
    pub fn award_once<F>(&self, reference: Reference, award: F) -> Result<AwardOutcome, LedgerError>
    where
        F: FnOnce(Claim) -> Result<Transaction, LedgerError>,
    {
        let _serialized = self
            .stripe(&reference)
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        if let Some(transaction_id) = self.ledger.find_award(&reference)? {
            return Ok(already_awarded(&reference, transaction_id));
        }

        match award(Claim {
            reference: reference.clone(),
        }) {
            Ok(transaction) => Ok(AwardOutcome::Awarded(transaction)),
            // Another process sharing the store won the race.
            Err(LedgerError::DuplicateAward { transaction_id, .. }) => {
                Ok(already_awarded(&reference, transaction_id))
            }
            Err(e) => Err(e),
        }
    }

    fn stripe(&self, reference: &Reference) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        reference.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }
}

fn already_awarded(reference: &Reference, transaction_id: TransactionId) -> AwardOutcome {
    DUPLICATE_AWARDS_TOTAL.inc();
    info!(
        "{} already awarded by transaction {}, skipping",
        reference, transaction_id
    );
    AwardOutcome::AlreadyAwarded { transaction_id }
}
