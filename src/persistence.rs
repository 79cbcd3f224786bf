//! SQLite-backed ledger store.
//!
//! Every mutation runs in one `BEGIN IMMEDIATE` transaction, so the balance
//! read, the history append, the cached balance update and the award marker
//! commit together or not at all. Writers waiting on the database lock give up
//! after the configured busy timeout and surface `StorageError::Timeout`.

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
    chrono::{DateTime, SecondsFormat, SubsecRound, Utc},
    rusqlite::{
        Connection, OptionalExtension, Row, TransactionBehavior, params, types::Type,
    },
    rust_decimal::Decimal,
    std::{
        path::{Path, PathBuf},
        str::FromStr,
        sync::Mutex,
        time::Duration,
    },
    tracing::debug,
};

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        user_id INTEGER PRIMARY KEY,
        balance TEXT NOT NULL,
        last_transaction_id INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL,
        delta TEXT NOT NULL,
        type TEXT NOT NULL,
        reference TEXT,
        reference_type TEXT,
        balance_before TEXT NOT NULL,
        balance_after TEXT NOT NULL,
        note TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS transactions_by_user ON transactions (user_id, id);
    CREATE INDEX IF NOT EXISTS transactions_by_created_at ON transactions (created_at);

    CREATE TABLE IF NOT EXISTS award_markers (
        reference_type TEXT NOT NULL,
        reference TEXT NOT NULL,
        transaction_id INTEGER NOT NULL REFERENCES transactions (id),
        PRIMARY KEY (reference_type, reference)
    );

    CREATE TRIGGER IF NOT EXISTS transactions_no_update BEFORE UPDATE ON transactions
    BEGIN
        SELECT RAISE(ABORT, 'transactions are append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS transactions_no_delete BEFORE DELETE ON transactions
    BEGIN
        SELECT RAISE(ABORT, 'transactions are append-only');
    END;
";

const TRANSACTION_COLUMNS: &str = "id, user_id, delta, type, reference, reference_type, \
     balance_before, balance_after, note, created_at";

const MAX_IDLE_CONNECTIONS: usize = 8;

pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, LedgerError> {
        let store = SqliteStore {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
            idle: Mutex::new(Vec::new()),
        };

        let conn = store.connect()?;
        conn.execute_batch(SCHEMA_SQL)?;
        store.release(conn);

        debug!("Opened ledger database at {}", store.path.display());

        Ok(store)
    }

    fn connect(&self) -> Result<Connection, LedgerError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_CONNECTIONS {
                idle.push(conn);
            }
        }
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&mut Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let pooled = self
            .idle
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .pop();

        let mut conn = match pooled {
            Some(conn) => conn,
            None => self.connect()?,
        };

        let result = operation(&mut conn);
        self.release(conn);
        result
    }
}

impl LedgerStore for SqliteStore {
    fn get_balance(&self, user_id: UserId) -> Result<Points, LedgerError> {
        self.with_connection(|conn| Ok(load_head(conn, user_id)?.balance))
    }

    fn append(&self, entry: NewEntry) -> Result<Transaction, LedgerError> {
        self.with_connection(|conn| {
            let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let claimed = if entry.claims_award {
                let reference = entry.reference.clone().ok_or_else(|| {
                    StorageError::Corrupted("award claimed without a reference".to_string())
                })?;

                if let Some(transaction_id) = load_award(&db_tx, &reference)? {
                    return Err(LedgerError::DuplicateAward {
                        reference,
                        transaction_id,
                    });
                }
                Some(reference)
            } else {
                None
            };

            let head = load_head(&db_tx, entry.user_id)?;
            settle(&head, entry.delta)?;

            let id: TransactionId = db_tx.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM transactions",
                [],
                |row| row.get(0),
            )?;
            let transaction = record(&head, id, entry, Utc::now().trunc_subsecs(6))?;

            insert_transaction(&db_tx, &transaction)?;

            db_tx.execute(
                "INSERT INTO accounts (user_id, balance, last_transaction_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id) DO UPDATE SET
                    balance = excluded.balance,
                    last_transaction_id = excluded.last_transaction_id,
                    updated_at = excluded.updated_at",
                params![
                    user_key(transaction.user_id),
                    transaction.balance_after.to_string(),
                    transaction.id,
                    timestamp(transaction.created_at),
                ],
            )?;

            if let Some(reference) = claimed {
                db_tx.execute(
                    "INSERT INTO award_markers (reference_type, reference, transaction_id)
                     VALUES (?1, ?2, ?3)",
                    params![reference.reference_type, reference.id, transaction.id],
                )?;
            }

            db_tx.commit()?;

            Ok(transaction)
        })
    }

    fn find_award(&self, reference: &Reference) -> Result<Option<TransactionId>, LedgerError> {
        self.with_connection(|conn| Ok(load_award(conn, reference)?))
    }

    fn history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3"
            ))?;

            let rows = stmt.query_map(
                params![
                    user_key(user_id),
                    i64::try_from(limit).unwrap_or(i64::MAX),
                    i64::try_from(offset).unwrap_or(i64::MAX),
                ],
                transaction_from_row,
            )?;

            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn statistics(&self, since: DateTime<Utc>) -> Result<Statistics, LedgerError> {
        self.with_connection(|conn| {
            // One read transaction: both queries see the same WAL snapshot.
            let snapshot = conn.transaction()?;

            let (total_points, accounts) = {
                let mut stmt = snapshot.prepare("SELECT balance FROM accounts")?;
                let balances = stmt.query_map([], |row| parsed_column::<Points>(row, 0))?;

                let mut total = Decimal::ZERO;
                let mut count = 0u64;
                for balance in balances {
                    let balance = balance?;
                    total = total
                        .checked_add(balance)
                        .ok_or(LedgerError::AmountOutOfRange { amount: balance })?;
                    count += 1;
                }
                (total, count)
            };

            let transactions_today: u64 = snapshot.query_row(
                "SELECT COUNT(*) FROM transactions WHERE created_at >= ?1",
                [timestamp(since)],
                |row| row.get(0),
            )?;

            snapshot.commit()?;

            Ok(Statistics::from_totals(
                total_points,
                accounts,
                transactions_today,
            ))
        })
    }

    fn audit(&self, user_id: UserId) -> Result<AuditReport, LedgerError> {
        self.with_connection(|conn| {
            let snapshot = conn.transaction()?;

            let cached_balance = load_head(&snapshot, user_id)?.balance;
            let history = {
                let mut stmt = snapshot.prepare(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions
                     WHERE user_id = ?1 ORDER BY id ASC"
                ))?;
                stmt.query_map([user_key(user_id)], transaction_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            snapshot.commit()?;

            Ok(AuditReport::replay(user_id, cached_balance, &history))
        })
    }
}

fn load_head(conn: &Connection, user_id: UserId) -> rusqlite::Result<AccountHead> {
    let head = conn
        .query_row(
            "SELECT balance, last_transaction_id FROM accounts WHERE user_id = ?1",
            [user_key(user_id)],
            |row| {
                Ok(AccountHead {
                    balance: parsed_column(row, 0)?,
                    last_transaction_id: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(head.unwrap_or_default())
}

fn load_award(conn: &Connection, reference: &Reference) -> rusqlite::Result<Option<TransactionId>> {
    conn.query_row(
        "SELECT transaction_id FROM award_markers WHERE reference_type = ?1 AND reference = ?2",
        params![reference.reference_type, reference.id],
        |row| row.get(0),
    )
    .optional()
}

fn insert_transaction(conn: &Connection, transaction: &Transaction) -> rusqlite::Result<()> {
    let (reference_type, reference) = match &transaction.reference {
        Some(reference) => (
            Some(reference.reference_type.as_str()),
            Some(reference.id.as_str()),
        ),
        None => (None, None),
    };

    conn.execute(
        &format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            transaction.id,
            user_key(transaction.user_id),
            transaction.delta.to_string(),
            transaction.kind.as_str(),
            reference,
            reference_type,
            transaction.balance_before.to_string(),
            transaction.balance_after.to_string(),
            transaction.note,
            timestamp(transaction.created_at),
        ],
    )?;

    Ok(())
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let reference: Option<String> = row.get(4)?;
    let reference_type: Option<String> = row.get(5)?;

    Ok(Transaction {
        id: row.get(0)?,
        user_id: user_from_key(row.get(1)?),
        delta: parsed_column(row, 2)?,
        kind: parsed_column(row, 3)?,
        reference: match (reference_type, reference) {
            (Some(reference_type), Some(id)) => Some(Reference { reference_type, id }),
            _ => None,
        },
        balance_before: parsed_column(row, 6)?,
        balance_after: parsed_column(row, 7)?,
        note: row.get(8)?,
        created_at: parsed_column(row, 9)?,
    })
}

// SQLite integers are signed, so user ids are stored bit for bit as i64.
fn user_key(user_id: UserId) -> i64 {
    user_id as i64
}

fn user_from_key(key: i64) -> UserId {
    key as UserId
}

/// Reads a text column and parses it, reporting failures as conversion errors.
fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// Fixed width so that text comparison orders timestamps.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use {
        super::*, crate::models::TransactionType, crate::test_utils::TempDb,
        chrono::Duration as ChronoDuration, rust_decimal_macros::dec,
    };

    fn open(db: &TempDb) -> SqliteStore {
        SqliteStore::open(db.path(), Duration::from_secs(5)).unwrap()
    }

    fn entry(user_id: UserId, delta: Points) -> NewEntry {
        NewEntry {
            user_id,
            delta,
            kind: TransactionType::Manual,
            reference: None,
            note: "test".to_string(),
            claims_award: false,
        }
    }

    fn award(user_id: UserId, delta: Points, order_id: u64) -> NewEntry {
        NewEntry {
            kind: TransactionType::OrderCompletion,
            reference: Some(Reference::order(order_id)),
            claims_award: true,
            ..entry(user_id, delta)
        }
    }

    #[test]
    fn test_unknown_account_has_zero_balance() {
        let db = TempDb::new();
        let store = open(&db);
        assert_eq!(store.get_balance(1).unwrap(), dec!(0));
    }

    #[test]
    fn test_append_and_read_back() {
        let db = TempDb::new();
        let store = open(&db);

        let appended = store.append(award(1, dec!(12.5), 1001)).unwrap();
        let history = store.history(1, 10, 0).unwrap();

        assert_eq!(history, vec![appended]);
        assert_eq!(history[0].reference, Some(Reference::order(1001)));
        assert_eq!(store.get_balance(1).unwrap(), dec!(12.5));
    }

    #[test]
    fn test_state_survives_reopen() {
        let db = TempDb::new();
        {
            let store = open(&db);
            store.append(entry(1, dec!(500))).unwrap();
            store.append(award(1, dec!(20), 5)).unwrap();
        }

        let store = open(&db);
        assert_eq!(store.get_balance(1).unwrap(), dec!(520));
        assert!(store.find_award(&Reference::order(5)).unwrap().is_some());
        assert!(store.audit(1).unwrap().is_consistent());
    }

    #[test]
    fn test_insufficient_balance_rolls_back() {
        let db = TempDb::new();
        let store = open(&db);
        store.append(entry(1, dec!(500))).unwrap();

        match store.append(entry(1, dec!(-700))) {
            Err(LedgerError::InsufficientBalance { balance, shortage }) => {
                assert_eq!(balance, dec!(500));
                assert_eq!(shortage, dec!(200));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(store.get_balance(1).unwrap(), dec!(500));
        assert_eq!(store.history(1, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_award_is_rejected() {
        let db = TempDb::new();
        let store = open(&db);
        let first = store.append(award(1, dec!(50), 9)).unwrap();

        assert!(matches!(
            store.append(award(1, dec!(50), 9)),
            Err(LedgerError::DuplicateAward { transaction_id, .. }) if transaction_id == first.id
        ));
        assert_eq!(store.history(1, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_purchase_and_award_may_share_a_reference() {
        let db = TempDb::new();
        let store = open(&db);
        store.append(entry(1, dec!(100))).unwrap();

        let mut purchase = entry(1, dec!(-30));
        purchase.kind = TransactionType::Purchase;
        purchase.reference = Some(Reference::order(11));
        store.append(purchase).unwrap();
        store.append(award(1, dec!(5), 11)).unwrap();

        assert_eq!(store.get_balance(1).unwrap(), dec!(75));
    }

    #[test]
    fn test_transactions_are_append_only() {
        let db = TempDb::new();
        let store = open(&db);
        store.append(entry(1, dec!(10))).unwrap();

        let conn = Connection::open(db.path()).unwrap();
        assert!(
            conn.execute("UPDATE transactions SET delta = '99'", [])
                .is_err()
        );
        assert!(conn.execute("DELETE FROM transactions", []).is_err());
    }

    #[test]
    fn test_history_pages_do_not_overlap() {
        let db = TempDb::new();
        let store = open(&db);
        for amount in 1..=5 {
            store.append(entry(1, Decimal::from(amount))).unwrap();
        }

        let first = store.history(1, 2, 0).unwrap();
        let second = store.history(1, 2, 2).unwrap();
        let ids: Vec<_> = first.iter().chain(second.iter()).map(|t| t.id).collect();

        assert_eq!(ids, vec![5, 4, 3, 2]);
    }

    #[test]
    fn test_statistics() {
        let db = TempDb::new();
        let store = open(&db);
        store.append(entry(1, dec!(100))).unwrap();
        store.append(entry(2, dec!(250))).unwrap();
        store.append(entry(2, dec!(-50))).unwrap();

        let stats = store
            .statistics(Utc::now() - ChronoDuration::hours(1))
            .unwrap();
        assert_eq!(stats.total_points, dec!(300));
        assert_eq!(stats.accounts, 2);
        assert_eq!(stats.average_balance, dec!(150));
        assert_eq!(stats.transactions_today, 3);
    }

    #[test]
    fn test_large_user_ids_match_the_memory_store() {
        let db = TempDb::new();
        let sqlite = open(&db);
        let memory = crate::ledger::memory::MemoryStore::new();
        let user_id = UserId::MAX;

        assert_eq!(sqlite.get_balance(user_id).unwrap(), dec!(0));
        assert_eq!(memory.get_balance(user_id).unwrap(), dec!(0));

        let stored = sqlite.append(entry(user_id, dec!(7))).unwrap();
        memory.append(entry(user_id, dec!(7))).unwrap();

        assert_eq!(sqlite.get_balance(user_id).unwrap(), dec!(7));
        assert_eq!(memory.get_balance(user_id).unwrap(), dec!(7));
        assert_eq!(sqlite.history(user_id, 10, 0).unwrap(), vec![stored]);
        assert_eq!(sqlite.history(user_id, 10, 0).unwrap()[0].user_id, user_id);
        assert!(sqlite.audit(user_id).unwrap().is_consistent());
        assert_eq!(sqlite.get_balance(i64::MAX as UserId).unwrap(), dec!(0));
    }

    #[test]
    fn test_failed_marker_write_rolls_back_the_award() {
        let db = TempDb::new();
        let store = open(&db);

        let conn = Connection::open(db.path()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_markers BEFORE INSERT ON award_markers
             BEGIN
                 SELECT RAISE(ABORT, 'marker write failed');
             END;",
        )
        .unwrap();

        assert!(matches!(
            store.append(award(1, dec!(50), 21)),
            Err(LedgerError::Storage(_))
        ));
        assert!(store.history(1, 10, 0).unwrap().is_empty());
        assert_eq!(store.get_balance(1).unwrap(), dec!(0));
        assert_eq!(store.find_award(&Reference::order(21)).unwrap(), None);
        assert_eq!(store.statistics(Utc::now()).unwrap().accounts, 0);

        conn.execute_batch("DROP TRIGGER reject_markers;").unwrap();

        let retried = store.append(award(1, dec!(50), 21)).unwrap();
        assert_eq!(retried.balance_after, dec!(50));
        assert_eq!(
            store.find_award(&Reference::order(21)).unwrap(),
            Some(retried.id)
        );
    }

    #[test]
    fn test_statistics_overflow_is_reported() {
        let db = TempDb::new();
        let store = open(&db);
        store.append(entry(1, Decimal::MAX)).unwrap();
        store.append(entry(2, Decimal::MAX)).unwrap();

        assert!(matches!(
            store.statistics(Utc::now()),
            Err(LedgerError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            store.append(entry(1, dec!(1))),
            Err(LedgerError::AmountOutOfRange { .. })
        ));
        assert_eq!(store.history(1, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupted_balance_surfaces_as_storage_error() {
        let db = TempDb::new();
        let store = open(&db);
        store.append(entry(1, dec!(10))).unwrap();

        let conn = Connection::open(db.path()).unwrap();
        conn.execute("UPDATE accounts SET balance = 'ten'", [])
            .unwrap();

        assert!(matches!(
            store.get_balance(1),
            Err(LedgerError::Storage(StorageError::Database(_)))
        ));
    }
}
