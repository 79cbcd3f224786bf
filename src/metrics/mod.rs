use prometheus::{Counter, Histogram};

use crate::metrics::handler::{counter, histogram_fast_ops, histogram_slow_ops};
pub mod handler;
lazy_static::lazy_static!(
    pub static ref TRANSACTIONS_RECORDED_TOTAL: Counter =
        counter("transactions_recorded_total", "Total number of ledger transactions recorded");

    pub static ref POINTS_CREDITED_TOTAL: Counter =
        counter("points_credited_total", "Total points credited to accounts");

    pub static ref POINTS_DEBITED_TOTAL: Counter =
        counter("points_debited_total", "Total points debited from accounts");

    pub static ref INSUFFICIENT_BALANCE_TOTAL: Counter =
        counter("insufficient_balance_total", "Total number of debits rejected for insufficient balance");

    pub static ref DUPLICATE_AWARDS_TOTAL: Counter =
        counter("duplicate_awards_total", "Total number of award attempts skipped as already awarded");

    pub static ref STORAGE_ERRORS_TOTAL: Counter =
        counter("storage_errors_total", "Total number of ledger operations failed by storage");


    pub static ref APPEND_TIME_SECONDS: Histogram =
        histogram_slow_ops("append_time_seconds", "Total time spent appending ledger transactions in seconds");

    pub static ref STATISTICS_TIME_SECONDS: Histogram =
        histogram_slow_ops("statistics_time_seconds", "Total time spent computing ledger statistics in seconds");

    pub static ref HISTORY_TIME_SECONDS: Histogram =
        histogram_fast_ops("history_time_seconds", "Total time spent reading transaction history in seconds");

    pub static ref GET_BALANCE_TIME_SECONDS: Histogram =
        histogram_fast_ops("get_balance_time_seconds", "Total time spent getting account balance in seconds");
);
