//! Cycle and settlement notifications
//!
//! Delivery is best-effort: the dispatcher runs notifiers on a background task
//! and only logs failures.

mod telegram;


pub use telegram::TelegramNotifier;

use crate::error::Result;
use crate::types::{Cycle, CycleId, Group, GroupId, MemberId, Money, SettlementSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerNotice {
    pub group_id: GroupId,
    pub cycle_id: CycleId,
    pub cycle_number: i64,
    pub member_id: MemberId,
    pub payout_amount: Money,
    pub is_random: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDueNotice {
    pub group_id: GroupId,
    pub cycle_id: CycleId,
    pub member_id: MemberId,
    pub payable_amount: Money,
    pub profit_share: Money,
}

/// A new bidding cycle is open for the group's members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOpenedNotice {
    pub group_id: GroupId,
    pub group_name: String,
    pub cycle_id: CycleId,
    pub cycle_number: i64,
    pub pool_amount: Money,
    pub bidding_start: DateTime<Utc>,
    pub bidding_end: DateTime<Utc>,
    pub member_ids: Vec<MemberId>,
}

impl CycleOpenedNotice {
    pub fn message(&self) -> String {
        format!(
            "📢 New bidding cycle #{} for {}: pool ₹{}. Bidding opens {} and ends {}",
            self.cycle_number,
            self.group_name,
            self.pool_amount,
            self.bidding_start.format("%Y-%m-%d %H:%M UTC"),
            self.bidding_end.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

impl WinnerNotice {
    pub fn message(&self) -> String {
        if self.is_random {
            format!(
                "🎉 Member {} won cycle #{} of group {} (random selection, no bids). Payout: ₹{}",
                self.member_id, self.cycle_number, self.group_id, self.payout_amount
            )
        } else {
            format!(
                "🎉 Member {} won cycle #{} of group {}. Payout: ₹{}",
                self.member_id, self.cycle_number, self.group_id, self.payout_amount
            )
        }
    }
}

impl PaymentDueNotice {
    pub fn message(&self) -> String {
        if self.profit_share.is_positive() {
            format!(
                "💰 Member {}: payment due ₹{} for cycle {}. Profit share earned: ₹{}",
                self.member_id, self.payable_amount, self.cycle_id, self.profit_share
            )
        } else {
            format!(
                "💰 Member {}: payment due ₹{} for cycle {} (full amount)",
                self.member_id, self.payable_amount, self.cycle_id
            )
        }
    }
}

/// Delivery channel for cycle announcements and settlement outcomes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_cycle_opened(&self, notice: CycleOpenedNotice) -> Result<()>;

    async fn notify_winner(&self, notice: WinnerNotice) -> Result<()>;

    async fn notify_payment_due(&self, notice: PaymentDueNotice) -> Result<()>;
}

/// Writes notices to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_cycle_opened(&self, notice: CycleOpenedNotice) -> Result<()> {
        info!(cycle_id = notice.cycle_id, group_id = notice.group_id, "{}", notice.message());
        Ok(())
    }

    async fn notify_winner(&self, notice: WinnerNotice) -> Result<()> {
        info!(cycle_id = notice.cycle_id, member_id = notice.member_id, "{}", notice.message());
        Ok(())
    }

    async fn notify_payment_due(&self, notice: PaymentDueNotice) -> Result<()> {
        debug!(cycle_id = notice.cycle_id, member_id = notice.member_id, "{}", notice.message());
        Ok(())
    }
}

/// Fans cycle events out to the notifier without blocking the caller
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(LogNotifier))
    }

    pub fn cycle_opened_notice(
        group: &Group,
        cycle: &Cycle,
        members: &[MemberId],
    ) -> CycleOpenedNotice {
        CycleOpenedNotice {
            group_id: group.id,
            group_name: group.name.clone(),
            cycle_id: cycle.id,
            cycle_number: cycle.cycle_number,
            pool_amount: cycle.total_pool_amount,
            bidding_start: cycle.bidding_start,
            bidding_end: cycle.bidding_end,
            member_ids: members.to_vec(),
        }
    }

    /// Spawns the announcement for a freshly opened cycle
    pub fn announce_cycle(&self, notice: CycleOpenedNotice) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let cycle_id = notice.cycle_id;
            match notifier.notify_cycle_opened(notice).await {
                Ok(()) => debug!(cycle_id, "Cycle announcement sent"),
                Err(e) => warn!(cycle_id, "Failed to send cycle announcement: {}", e),
            }
        })
    }

    pub fn winner_notice(summary: &SettlementSummary) -> WinnerNotice {
        WinnerNotice {
            group_id: summary.group_id,
            cycle_id: summary.cycle_id,
            cycle_number: summary.cycle_number,
            member_id: summary.winner_member_id,
            payout_amount: summary.payout_amount,
            is_random: summary.is_random_winner,
        }
    }

    pub fn payment_notices(summary: &SettlementSummary) -> Vec<PaymentDueNotice> {
        summary
            .shares
            .iter()
            .map(|share| PaymentDueNotice {
                group_id: summary.group_id,
                cycle_id: summary.cycle_id,
                member_id: share.member_id,
                payable_amount: share.payable_amount,
                profit_share: share.profit_share,
            })
            .collect()
    }

    /// Spawns delivery; the handle is only useful to callers that want to wait
    pub fn dispatch(&self, summary: &SettlementSummary) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        let winner = Self::winner_notice(summary);
        let payments = Self::payment_notices(summary);

        tokio::spawn(async move {
            let cycle_id = winner.cycle_id;
            if let Err(e) = notifier.notify_winner(winner).await {
                warn!(cycle_id, "Failed to send winner notification: {}", e);
            }

            let mut failed = 0usize;
            for notice in payments {
                let member_id = notice.member_id;
                if let Err(e) = notifier.notify_payment_due(notice).await {
                    failed += 1;
                    warn!(cycle_id, member_id, "Failed to send payment notification: {}", e);
                }
            }

            if failed == 0 {
                debug!(cycle_id, "Settlement notifications sent");
            }
        })
    }
}
