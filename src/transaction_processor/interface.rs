use crate::{
    models::{Points, Transaction, TransactionId, UserId},
    transaction_processor::error::TransactionProcessorError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub product_id: u64,
    pub quantity: u32,
    pub points_earned_per_unit: Points,
}

/// An order reached the completed state.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCompletion {
    pub order_id: String,
    pub user_id: UserId,
    pub line_items: Vec<LineItem>,
}

/// Signed manual adjustment from an administrator.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminAdjustment {
    pub user_id: UserId,
    pub signed_amount: Points,
    pub reason: Option<String>,
}

/// Checkout paying an order with points.
#[derive(Debug, Clone, PartialEq)]
pub struct PointsPayment {
    pub order_id: String,
    pub user_id: UserId,
    pub order_total_points: Points,
}

/// Import of a balance kept by a previous system.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceMigration {
    pub user_id: UserId,
    pub legacy_balance: Points,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    CompleteOrder(OrderCompletion),
    Adjust(AdminAdjustment),
    PayWithPoints(PointsPayment),
    MigrateBalance(BalanceMigration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResult {
    Recorded(Transaction),
    /// The event was seen before; nothing changed.
    AlreadyAwarded { transaction_id: TransactionId },
    /// The event carries no points, so nothing was recorded.
    NothingToAward,
}

pub trait TransactionProcessorInterface {
    /// Applies one inbound event to the ledger.
    fn process_transaction(
        &self,
        instruction: Instruction,
    ) -> Result<TransactionResult, TransactionProcessorError>;
}
