//! Transaction Processor module for turning store events into ledger operations.
//! Awards go through the idempotency guard; payments and adjustments go
//! straight to the balance mutator.

pub mod error;
pub mod interface;

use {
    crate::{
        ledger::{
            Ledger,
            error::LedgerError,
            guard::{AwardOutcome, IdempotencyGuard},
            mutator::PointsRequest,
        },
        models::{Reference, TransactionType, normalize},
        transaction_processor::{
            error::TransactionProcessorError,
            interface::{
                AdminAdjustment, BalanceMigration, Instruction, OrderCompletion, PointsPayment,
                TransactionProcessorInterface, TransactionResult,
            },
        },
    },
    rust_decimal::Decimal,
    std::sync::Arc,
    tracing::info,
};

pub struct TransactionProcessor {
    ledger: Arc<Ledger>,
    guard: IdempotencyGuard,
}

impl TransactionProcessor {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        TransactionProcessor {
            guard: IdempotencyGuard::new(ledger.clone()),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    fn process_order_completion(
        &self,
        order: OrderCompletion,
    ) -> Result<TransactionResult, TransactionProcessorError> {
        let mut total = Decimal::ZERO;
        for item in &order.line_items {
            if item.quantity == 0 {
                return Err(TransactionProcessorError::InvalidLineItem {
                    product_id: item.product_id,
                    reason: "quantity must be positive".to_string(),
                });
            }
            if item.points_earned_per_unit < Decimal::ZERO {
                return Err(TransactionProcessorError::InvalidLineItem {
                    product_id: item.product_id,
                    reason: "points earned cannot be negative".to_string(),
                });
            }
            total = item
                .points_earned_per_unit
                .checked_mul(Decimal::from(item.quantity))
                .and_then(|points| total.checked_add(points))
                .ok_or(LedgerError::AmountOutOfRange {
                    amount: item.points_earned_per_unit,
                })?;
        }

        if normalize(total).is_zero() {
            info!("Order {} earns no points", order.order_id);
            return Ok(TransactionResult::NothingToAward);
        }

        let request = PointsRequest::new(order.user_id, total, TransactionType::OrderCompletion)
            .with_note(format!("Points earned from order #{}", order.order_id));

        self.award(Reference::order(&order.order_id), request)
    }

    fn process_adjustment(
        &self,
        adjustment: AdminAdjustment,
    ) -> Result<TransactionResult, TransactionProcessorError> {
        let amount = adjustment.signed_amount;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount { amount }.into());
        }

        let mut request = PointsRequest::new(adjustment.user_id, amount.abs(), TransactionType::Manual);
        if let Some(reason) = adjustment.reason {
            request = request.with_note(reason);
        }

        let transaction = if amount > Decimal::ZERO {
            self.ledger.credit(request)?
        } else {
            self.ledger.debit(request)?
        };

        info!(
            "Manual adjustment of {} for user {}, balance now {}",
            transaction.delta, transaction.user_id, transaction.balance_after
        );

        Ok(TransactionResult::Recorded(transaction))
    }

    fn process_payment(
        &self,
        payment: PointsPayment,
    ) -> Result<TransactionResult, TransactionProcessorError> {
        let request = PointsRequest::new(
            payment.user_id,
            payment.order_total_points,
            TransactionType::Purchase,
        )
        .with_reference(Reference::order(&payment.order_id))
        .with_note(format!("Points used for order #{}", payment.order_id));

        let transaction = self.ledger.debit(request)?;

        info!(
            "Order {} paid with {} points by user {}",
            payment.order_id, payment.order_total_points, payment.user_id
        );

        Ok(TransactionResult::Recorded(transaction))
    }

    fn process_migration(
        &self,
        migration: BalanceMigration,
    ) -> Result<TransactionResult, TransactionProcessorError> {
        let amount = migration.legacy_balance;
        if amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount { amount }.into());
        }
        if normalize(amount).is_zero() {
            return Ok(TransactionResult::NothingToAward);
        }

        let request = PointsRequest::new(migration.user_id, amount, TransactionType::Migration);

        self.award(Reference::migration(migration.user_id), request)
    }

    fn award(
        &self,
        reference: Reference,
        request: PointsRequest,
    ) -> Result<TransactionResult, TransactionProcessorError> {
        let ledger = &self.ledger;
        let outcome = self
            .guard
            .award_once(reference, |claim| ledger.credit(request.claiming(claim)))?;

        Ok(match outcome {
            AwardOutcome::Awarded(transaction) => TransactionResult::Recorded(transaction),
            AwardOutcome::AlreadyAwarded { transaction_id } => {
                TransactionResult::AlreadyAwarded { transaction_id }
            }
        })
    }
}

impl TransactionProcessorInterface for TransactionProcessor {
    fn process_transaction(
        &self,
        instruction: Instruction,
    ) -> Result<TransactionResult, TransactionProcessorError> {
        match instruction {
            Instruction::CompleteOrder(order) => self.process_order_completion(order),
            Instruction::Adjust(adjustment) => self.process_adjustment(adjustment),
            Instruction::PayWithPoints(payment) => self.process_payment(payment),
            Instruction::MigrateBalance(migration) => self.process_migration(migration),
        }
    }
}
