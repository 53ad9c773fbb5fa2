//! Cycle settlement engine
//!
//! Moves a cycle from `open` to `closed` exactly once, picks the winner and
//! writes the profit split. Every trigger (scanner, request check, admin)
//! calls [`SettlementEngine::settle`].
//!
//! The claim is the first statement of the settlement transaction:
//!
//! ```text
//! BEGIN
//!   UPDATE bidding_cycles SET status='closed', version=version+1
//!    WHERE id=? AND status='open'          -- 0 rows => lost the race
//!   read bids / members / winners / contributions
//!   write winner, profit_distributions, payable amounts
//! COMMIT                                   -- any error => rollback, cycle stays open
//! notify (spawned, best-effort)
//! ```

pub mod plan;


pub use plan::{ProfitSplit, SettlementPlan, WinnerSelection};

use crate::error::{ChitError, ErrorKind, Result};
use crate::notify::NotificationDispatcher;
use crate::storage::{micros, queries, Database};
use crate::types::{CycleId, MemberId, SettlementSummary};
use chrono::Utc;
use parking_lot::Mutex;
use plan::PlanInput;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Which surface asked for the settlement; used for logging only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementTrigger {
    Scanner,
    RequestCheck,
    Admin { admin_id: MemberId },
    Cli,
}

impl fmt::Display for SettlementTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementTrigger::Scanner => write!(f, "scanner"),
            SettlementTrigger::RequestCheck => write!(f, "request_check"),
            SettlementTrigger::Admin { admin_id } => write!(f, "admin:{}", admin_id),
            SettlementTrigger::Cli => write!(f, "cli"),
        }
    }
}

pub struct SettlementEngine {
    db: Database,
    notifications: NotificationDispatcher,
    rng: Mutex<StdRng>,
}

impl SettlementEngine {
    pub fn new(db: Database, notifications: NotificationDispatcher) -> Self {
        Self {
            db,
            notifications,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic fallback draws
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Settle one cycle. Concurrent callers for the same cycle: one wins, the
    /// rest get [`ChitError::AlreadySettled`] without side effects.
    pub async fn settle(
        &self,
        cycle_id: CycleId,
        trigger: SettlementTrigger,
    ) -> Result<SettlementSummary> {
        match self.settle_in_transaction(cycle_id).await {
            Ok(summary) => {
                info!(
                    cycle_id,
                    group_id = summary.group_id,
                    %trigger,
                    winner = summary.winner_member_id,
                    winning_bid = %summary.winning_bid,
                    profit = %summary.profit_amount,
                    profit_per_member = %summary.profit_per_member,
                    random = summary.is_random_winner,
                    "Cycle settled"
                );
                self.notifications.dispatch(&summary);
                Ok(summary)
            }
            Err(e) => {
                match e.kind() {
                    _ if e.is_benign() => debug!(cycle_id, %trigger, "Cycle already settled"),
                    ErrorKind::NoEligibleWinner => {
                        error!(cycle_id, %trigger, "Settlement aborted: {}", e)
                    }
                    ErrorKind::Persistence => {
                        error!(cycle_id, %trigger, "Settlement rolled back: {}", e)
                    }
                    _ => warn!(cycle_id, %trigger, "Settlement rejected: {}", e),
                }
                Err(e)
            }
        }
    }

    async fn settle_in_transaction(&self, cycle_id: CycleId) -> Result<SettlementSummary> {
        let mut tx = self.db.pool().begin().await?;

        let claimed = sqlx::query(
            "UPDATE bidding_cycles SET status = 'closed', version = version + 1 \
             WHERE id = ?1 AND status = 'open'",
        )
        .bind(cycle_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            let existing = queries::fetch_cycle(&mut *tx, cycle_id).await?;
            tx.rollback().await?;
            return Err(match existing {
                Some(_) => ChitError::AlreadySettled(cycle_id),
                None => ChitError::CycleNotFound(cycle_id),
            });
        }

        let cycle = queries::fetch_cycle(&mut *tx, cycle_id)
            .await?
            .ok_or(ChitError::CycleNotFound(cycle_id))?;
        let group = queries::fetch_group(&mut *tx, cycle.group_id)
            .await?
            .ok_or(ChitError::GroupNotFound(cycle.group_id))?;
        let bids = queries::fetch_ranked_bids(&mut *tx, cycle_id).await?;
        let members = queries::fetch_members(&mut *tx, group.id).await?;
        let previous_winners =
            queries::fetch_previous_winners(&mut *tx, group.id, cycle_id).await?;
        let contributions = queries::fetch_contributions(&mut *tx, cycle_id).await?;

        let input = PlanInput {
            cycle_id,
            pool: cycle.total_pool_amount,
            bids: &bids,
            members: &members,
            previous_winners: &previous_winners,
            contributions: &contributions,
            default_contribution: group.contribution_amount,
        };
        let plan = {
            let mut rng = self.rng.lock();
            plan::build_plan(&input, &mut *rng)?
        };

        let winner = plan.winner.member_id();
        let finalized = sqlx::query(
            r"
            UPDATE bidding_cycles
            SET winner_member_id = ?1, winning_bid_amount = ?2, is_random_winner = ?3
            WHERE id = ?4 AND version = ?5 AND status = 'closed'
            ",
        )
        .bind(winner)
        .bind(plan.winning_bid.minor())
        .bind(plan.winner.is_random())
        .bind(cycle_id)
        .bind(cycle.version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if finalized != 1 {
            return Err(ChitError::InvalidState(format!(
                "cycle {} changed while settling (version {})",
                cycle_id, cycle.version
            )));
        }

        let now = Utc::now();
        if plan.split.has_profit() {
            for share in &plan.shares {
                sqlx::query(
                    r"
                    INSERT INTO profit_distributions
                        (cycle_id, member_id, profit_amount, created_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ",
                )
                .bind(cycle_id)
                .bind(share.member_id)
                .bind(share.profit_share.minor())
                .bind(micros(now))
                .execute(&mut *tx)
                .await?;
            }
        }

        for (contribution_id, payable) in &plan.payable_updates {
            sqlx::query("UPDATE contributions SET payable_amount = ?1 WHERE id = ?2")
                .bind(payable.minor())
                .bind(*contribution_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(SettlementSummary {
            cycle_id,
            group_id: group.id,
            cycle_number: cycle.cycle_number,
            winner_member_id: winner,
            winning_bid: plan.winning_bid,
            payout_amount: plan.winning_bid,
            profit_amount: plan.split.total,
            profit_per_member: plan.split.per_member,
            profit_remainder: plan.split.remainder,
            is_random_winner: plan.winner.is_random(),
            member_count: plan.shares.len(),
            shares: plan.shares,
            settled_at: now,
        })
    }
}
