//! Fixtures shared by the unit tests.

use {
    crate::{
        ledger::{
            Ledger,
            error::{LedgerError, StorageError},
            interface::LedgerStore,
            memory::MemoryStore,
            notifier::Notifier,
        },
        models::{
            AuditReport, NewEntry, Points, Reference, Statistics, Transaction, TransactionId,
            UserId,
        },
        persistence::SqliteStore,
    },
    chrono::{DateTime, Utc},
    std::{
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    },
    uuid::Uuid,
};

/// A database file in the temp directory, removed with its WAL files on drop.
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        TempDb {
            path: std::env::temp_dir().join(format!("tally-test-{}.db", Uuid::new_v4())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

pub fn memory_ledger() -> Ledger {
    Ledger::new(Arc::new(MemoryStore::new()), Notifier::new(64))
}

pub fn sqlite_ledger(db: &TempDb) -> Ledger {
    let store = SqliteStore::open(db.path(), Duration::from_secs(10)).unwrap();
    Ledger::new(Arc::new(store), Notifier::new(64))
}

/// Memory store whose next `failures` appends fail with a storage error.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing(failures: usize) -> Self {
        FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl LedgerStore for FlakyStore {
    fn get_balance(&self, user_id: UserId) -> Result<Points, LedgerError> {
        self.inner.get_balance(user_id)
    }

    fn append(&self, entry: NewEntry) -> Result<Transaction, LedgerError> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(StorageError::Timeout.into());
        }
        self.inner.append(entry)
    }

    fn find_award(&self, reference: &Reference) -> Result<Option<TransactionId>, LedgerError> {
        self.inner.find_award(reference)
    }

    fn history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.inner.history(user_id, limit, offset)
    }

    fn statistics(&self, since: DateTime<Utc>) -> Result<Statistics, LedgerError> {
        self.inner.statistics(since)
    }

    fn audit(&self, user_id: UserId) -> Result<AuditReport, LedgerError> {
        self.inner.audit(user_id)
    }
}
