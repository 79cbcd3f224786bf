use {
    crate::models::{Points, Reference, UserId},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
    thiserror::Error,
};

pub type TransactionId = u64;

/// Why a balance moved. Persisted as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    OrderCompletion,
    Manual,
    Purchase,
    Migration,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown transaction type: {0}")]
pub struct UnknownTransactionType(pub String);

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::OrderCompletion => "order_completion",
            TransactionType::Manual => "manual",
            TransactionType::Purchase => "purchase",
            TransactionType::Migration => "migration",
        }
    }

    /// Note recorded when the caller does not supply one.
    pub fn default_note(&self) -> &'static str {
        match self {
            TransactionType::OrderCompletion => "Points earned from order",
            TransactionType::Manual => "Manual adjustment",
            TransactionType::Purchase => "Points used for payment",
            TransactionType::Migration => "Balance migrated",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_completion" => Ok(TransactionType::OrderCompletion),
            "manual" => Ok(TransactionType::Manual),
            "purchase" => Ok(TransactionType::Purchase),
            "migration" => Ok(TransactionType::Migration),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

/// An immutable ledger record. `balance_after == balance_before + delta` always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub delta: Points,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub reference: Option<Reference>,
    pub balance_before: Points,
    pub balance_after: Points,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// A signed mutation handed to a [`crate::ledger::interface::LedgerStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub user_id: UserId,
    pub delta: Points,
    pub kind: TransactionType,
    pub reference: Option<Reference>,
    pub note: String,
    /// Record an award marker for `reference` in the same atomic unit.
    pub claims_award: bool,
}
