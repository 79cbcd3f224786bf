use {
    criterion::{Criterion, criterion_group, criterion_main},
    rust_decimal_macros::dec,
    std::sync::Arc,
    tally::{
        ledger::{Ledger, mutator::PointsRequest},
        models::{Reference, TransactionType},
        transaction_processor::{
            TransactionProcessor,
            interface::{
                Instruction, LineItem, OrderCompletion, TransactionProcessorInterface,
            },
        },
    },
};

pub fn bench_credit_single_account(c: &mut Criterion) {
    let ledger = Ledger::default();

    c.bench_function("credit_single_account", |b| {
        b.iter(|| {
            ledger
                .credit(PointsRequest::new(1, dec!(2.5), TransactionType::Manual))
                .ok()
        })
    });
}

pub fn bench_debit_with_rejections(c: &mut Criterion) {
    let ledger = Ledger::default();
    ledger
        .credit(PointsRequest::new(1, dec!(1000), TransactionType::Manual))
        .ok();

    // Once the balance runs out every debit takes the rejection path.
    c.bench_function("debit_with_rejections", |b| {
        b.iter(|| {
            ledger
                .debit(
                    PointsRequest::new(1, dec!(1), TransactionType::Purchase)
                        .with_reference(Reference::order("bench")),
                )
                .ok()
        })
    });
}

pub fn bench_redelivered_order(c: &mut Criterion) {
    let processor = TransactionProcessor::new(Arc::new(Ledger::default()));
    let order = || {
        Instruction::CompleteOrder(OrderCompletion {
            order_id: "redelivered".to_string(),
            user_id: 7,
            line_items: vec![LineItem {
                product_id: 1,
                quantity: 3,
                points_earned_per_unit: dec!(100),
            }],
        })
    };
    processor.process_transaction(order()).ok();

    c.bench_function("redelivered_order_10_000", |b| {
        b.iter(|| {
            for _ in 0..10_000 {
                processor.process_transaction(order()).ok();
            }
        })
    });
}

criterion_group!(
    benches,
    bench_credit_single_account,
    bench_debit_with_rejections,
    bench_redelivered_order,
);
criterion_main!(benches);
