use {
    rust_decimal::Decimal,
    serde::{Deserialize, Serialize},
    std::fmt,
};

pub mod transaction;

pub use transaction::{NewEntry, Transaction, TransactionId, TransactionType};

pub type UserId = u64;

/// Points are decimal so fractional earning rates never drift.
pub type Points = Decimal;

/// Every quantity entering the ledger is rounded to this many decimal places.
pub const POINTS_PRECISION: u32 = 4;

pub fn normalize(amount: Points) -> Points {
    amount.round_dp(POINTS_PRECISION)
}

/// External correlation id for a transaction, e.g. `order:1042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: String,
    pub id: String,
}

impl Reference {
    pub fn new(reference_type: impl Into<String>, id: impl ToString) -> Self {
        Reference {
            reference_type: reference_type.into(),
            id: id.to_string(),
        }
    }

    pub fn order(order_id: impl ToString) -> Self {
        Self::new("order", order_id)
    }

    pub fn migration(user_id: UserId) -> Self {
        Self::new("migration", user_id)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.id)
    }
}

/// System-wide aggregates, taken from a single snapshot of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_points: Points,
    pub accounts: u64,
    pub average_balance: Points,
    pub transactions_today: u64,
}

impl Statistics {
    pub fn from_totals(total_points: Points, accounts: u64, transactions_today: u64) -> Self {
        let average_balance = if accounts == 0 {
            Decimal::ZERO
        } else {
            normalize(total_points / Decimal::from(accounts))
        };

        Statistics {
            total_points,
            accounts,
            average_balance,
            transactions_today,
        }
    }
}

/// Result of replaying an account's history against its cached balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub user_id: UserId,
    pub cached_balance: Points,
    pub folded_balance: Points,
    pub transactions: u64,
    /// Every record satisfies `after = before + delta` and chains onto its predecessor.
    pub chain_intact: bool,
}

impl AuditReport {
    /// `history` must be ordered oldest first.
    pub fn replay(user_id: UserId, cached_balance: Points, history: &[Transaction]) -> Self {
        let mut folded_balance = Decimal::ZERO;
        let mut chain_intact = true;

        for record in history {
            if record.balance_before != folded_balance
                || record.balance_before.checked_add(record.delta) != Some(record.balance_after)
            {
                chain_intact = false;
            }
            match folded_balance.checked_add(record.delta) {
                Some(balance) => folded_balance = balance,
                None => {
                    chain_intact = false;
                    break;
                }
            }
        }

        AuditReport {
            user_id,
            cached_balance,
            folded_balance,
            transactions: history.len() as u64,
            chain_intact,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.chain_intact && self.cached_balance == self.folded_balance
    }
}
