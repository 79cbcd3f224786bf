//! Broadcasts committed balance changes to whoever is listening.
//!
//! Delivery is best effort: no subscribers, or subscribers that lag behind the
//! channel capacity, never affect the mutation that produced the event.

use {
    crate::models::{Points, Transaction, TransactionId, TransactionType, UserId},
    rust_decimal::Decimal,
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::trace,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointsChange {
    pub user_id: UserId,
    pub delta: Points,
    pub new_balance: Points,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PointsNotification {
    PointsAdded(PointsChange),
    PointsSubtracted(PointsChange),
}

impl PointsNotification {
    pub fn change(&self) -> &PointsChange {
        match self {
            PointsNotification::PointsAdded(change) | PointsNotification::PointsSubtracted(change) => {
                change
            }
        }
    }
}

impl From<&Transaction> for PointsNotification {
    fn from(transaction: &Transaction) -> Self {
        let change = PointsChange {
            user_id: transaction.user_id,
            delta: transaction.delta,
            new_balance: transaction.balance_after,
            kind: transaction.kind,
            transaction_id: transaction.id,
        };

        if transaction.delta > Decimal::ZERO {
            PointsNotification::PointsAdded(change)
        } else {
            PointsNotification::PointsSubtracted(change)
        }
    }
}

pub struct Notifier {
    sender: broadcast::Sender<PointsNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Notifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PointsNotification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, transaction: &Transaction) {
        // Err only means nobody is subscribed.
        let delivered = self.sender.send(transaction.into()).unwrap_or(0);
        trace!(
            "Published change for user {} to {} subscribers",
            transaction.user_id, delivered
        );
    }
}

#[cfg(test)]
mod tests {
    use {super::*, chrono::Utc, rust_decimal_macros::dec};

    fn transaction(delta: Points) -> Transaction {
        Transaction {
            id: 3,
            user_id: 9,
            delta,
            kind: TransactionType::Manual,
            reference: None,
            balance_before: dec!(100),
            balance_after: dec!(100) + delta,
            note: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let notifier = Notifier::new(4);
        notifier.publish(&transaction(dec!(10)));
    }

    #[test]
    fn test_subscriber_receives_added_and_subtracted() {
        let notifier = Notifier::new(4);
        let mut receiver = notifier.subscribe();

        notifier.publish(&transaction(dec!(10)));
        notifier.publish(&transaction(dec!(-20)));

        match receiver.try_recv().unwrap() {
            PointsNotification::PointsAdded(change) => {
                assert_eq!(change.new_balance, dec!(110));
                assert_eq!(change.user_id, 9);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
        assert!(matches!(
            receiver.try_recv().unwrap(),
            PointsNotification::PointsSubtracted(_)
        ));
    }

    #[test]
    fn test_notification_serializes_with_event_name() {
        let json = serde_json::to_value(PointsNotification::from(&transaction(dec!(5)))).unwrap();
        assert_eq!(json["event"], "points_added");
        assert_eq!(json["payload"]["type"], "manual");
    }
}
