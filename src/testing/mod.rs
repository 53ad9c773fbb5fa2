//! Shared fixtures for unit tests

use crate::error::Result;
use crate::notify::{CycleOpenedNotice, Notifier, PaymentDueNotice, WinnerNotice};
use crate::storage::Database;
use crate::types::{Cycle, Group, MemberId, Money, NewGroup};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Active group whose members have ids `1..=members`
pub async fn seed_group(
    db: &Database,
    members: i64,
    contribution: Money,
    max_reduction: Decimal,
) -> Group {
    let group = db
        .create_group(&NewGroup {
            name: "Test Chit".to_string(),
            contribution_amount: contribution,
            total_members: members,
            max_bid_reduction_pct: max_reduction,
            ..Default::default()
        })
        .await
        .unwrap();
    for member_id in 1..=members {
        db.add_member(group.id, member_id).await.unwrap();
    }
    group
}

/// Window that opened an hour ago and is still running for another hour
pub fn live_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::hours(1), now + Duration::hours(1))
}

/// Window that ended a minute ago
pub fn expired_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::hours(2), now - Duration::minutes(1))
}

pub async fn open_cycle(
    db: &Database,
    group: &Group,
    window: (DateTime<Utc>, DateTime<Utc>),
) -> Cycle {
    db.create_cycle(group.id, window.0, window.1).await.unwrap()
}

/// Write a bid row directly, bypassing window checks
pub async fn insert_bid(
    db: &Database,
    cycle: &Cycle,
    member_id: MemberId,
    amount: Money,
    at: DateTime<Utc>,
) {
    sqlx::query("INSERT INTO bids (cycle_id, member_id, amount, bid_time) VALUES (?1, ?2, ?3, ?4)")
        .bind(cycle.id)
        .bind(member_id)
        .bind(amount.minor())
        .bind(at.timestamp_micros())
        .execute(db.pool())
        .await
        .unwrap();
}

/// Mark a cycle as settled and approved for `winner` without going through the engine
pub async fn force_winner(db: &Database, cycle: &Cycle, winner: MemberId, approved: bool) {
    sqlx::query(
        "UPDATE bidding_cycles SET status = 'closed', winner_member_id = ?1, \
         winning_bid_amount = total_pool_amount, is_random_winner = 1, admin_approved = ?2 \
         WHERE id = ?3",
    )
    .bind(winner)
    .bind(approved)
    .bind(cycle.id)
    .execute(db.pool())
    .await
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    CycleOpened(CycleOpenedNotice),
    Winner(WinnerNotice),
    PaymentDue(PaymentDueNotice),
}

/// Forwards every notice to a channel the test can await
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Sent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_cycle_opened(&self, notice: CycleOpenedNotice) -> Result<()> {
        let _ = self.tx.send(Sent::CycleOpened(notice));
        Ok(())
    }

    async fn notify_winner(&self, notice: WinnerNotice) -> Result<()> {
        let _ = self.tx.send(Sent::Winner(notice));
        Ok(())
    }

    async fn notify_payment_due(&self, notice: PaymentDueNotice) -> Result<()> {
        let _ = self.tx.send(Sent::PaymentDue(notice));
        Ok(())
    }
}
