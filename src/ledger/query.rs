//! Read-side operations. Nothing here takes locks beyond what the store needs
//! for a consistent read.

use {
    crate::{
        ledger::{Ledger, error::LedgerError, report_storage},
        measure,
        metrics::{HISTORY_TIME_SECONDS, STATISTICS_TIME_SECONDS},
        models::{AuditReport, Statistics, Transaction, UserId},
    },
    chrono::{DateTime, NaiveTime, Utc},
};

impl Ledger {
    /// Up to `limit` transactions of `user_id`, newest first, skipping the
    /// `offset` newest ones.
    pub fn history(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        measure!(HISTORY_TIME_SECONDS, {
            self.store
                .history(user_id, limit, offset)
                .inspect_err(report_storage)
        })
    }

    pub fn statistics(&self) -> Result<Statistics, LedgerError> {
        self.statistics_at(Utc::now())
    }

    /// Statistics where "today" is the UTC day containing `now`.
    pub fn statistics_at(&self, now: DateTime<Utc>) -> Result<Statistics, LedgerError> {
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();

        measure!(STATISTICS_TIME_SECONDS, {
            self.store
                .statistics(start_of_day)
                .inspect_err(report_storage)
        })
    }

    /// Replays the account's history and compares it with its cached balance.
    pub fn audit(&self, user_id: UserId) -> Result<AuditReport, LedgerError> {
        self.store.audit(user_id).inspect_err(report_storage)
    }
}
