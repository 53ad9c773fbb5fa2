//! Bid ledger
//!
//! Validates and records one bid per (cycle, member). A second bid from the
//! same member replaces the first. Placing a bid never triggers settlement.


use crate::error::{ChitError, Result};
use crate::storage::{micros, queries, Database};
use crate::types::{Bid, Cycle, CycleId, Group, MemberId, Money};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Inclusive lower bound and exclusive upper bound for a cycle's bids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidBounds {
    pub floor: Money,
    pub pool: Money,
}

impl BidBounds {
    /// `pool × (1 − pct/100)`, rounded up to the minor unit
    pub fn for_pool(pool: Money, max_reduction_pct: Decimal) -> Result<Self> {
        let factor = (Decimal::ONE_HUNDRED - max_reduction_pct) / Decimal::ONE_HUNDRED;
        let floor = Money::from_decimal_ceil(pool.to_decimal() * factor)?;
        Ok(Self { floor, pool })
    }

    pub fn contains(&self, amount: Money) -> bool {
        amount >= self.floor && amount < self.pool
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidReceipt {
    pub bid: Bid,
    /// An earlier bid from the same member was overwritten
    pub replaced: bool,
}

/// Read-only view of a cycle's auction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidBoard {
    pub cycle_id: CycleId,
    pub pool: Money,
    pub min_bid: Money,
    pub max_bid_reduction_pct: Decimal,
    pub bid_count: usize,
    pub lowest_bid: Option<Money>,
    pub highest_bid: Option<Money>,
    pub bidding_end: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BidLedger {
    db: Database,
}

impl BidLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn place_bid(
        &self,
        cycle_id: CycleId,
        member_id: MemberId,
        amount: Money,
    ) -> Result<BidReceipt> {
        self.place_bid_at(cycle_id, member_id, amount, Utc::now()).await
    }

    pub async fn place_bid_at(
        &self,
        cycle_id: CycleId,
        member_id: MemberId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<BidReceipt> {
        let pool = self.db.pool();

        let cycle = queries::fetch_cycle(pool, cycle_id)
            .await?
            .ok_or(ChitError::CycleNotFound(cycle_id))?;
        if !cycle.is_open() {
            return Err(ChitError::CycleNotOpen(cycle_id));
        }

        let group = queries::fetch_group(pool, cycle.group_id)
            .await?
            .ok_or(ChitError::GroupNotFound(cycle.group_id))?;
        if group.is_completed() {
            return Err(ChitError::GroupCompleted(group.id));
        }

        if now < cycle.bidding_start {
            return Err(ChitError::BiddingNotStarted(cycle_id));
        }
        if now > cycle.bidding_end {
            return Err(ChitError::BiddingEnded(cycle_id));
        }

        if !queries::is_member(pool, group.id, member_id).await? {
            return Err(ChitError::NotAMember {
                member_id,
                group_id: group.id,
            });
        }
        if queries::has_won_before(pool, group.id, member_id, cycle_id).await? {
            return Err(ChitError::AlreadyWon {
                member_id,
                group_id: group.id,
            });
        }

        validate_amount(&cycle, &group, amount)?;

        let replaced = queries::fetch_bid(pool, cycle_id, member_id).await?.is_some();

        // Conditional on the cycle still being open at write time.
        let written = sqlx::query(
            r"
            INSERT INTO bids (cycle_id, member_id, amount, bid_time)
            SELECT ?1, ?2, ?3, ?4
            WHERE EXISTS (SELECT 1 FROM bidding_cycles WHERE id = ?1 AND status = 'open')
            ON CONFLICT(cycle_id, member_id) DO UPDATE SET
                amount = excluded.amount,
                bid_time = excluded.bid_time
            ",
        )
        .bind(cycle_id)
        .bind(member_id)
        .bind(amount.minor())
        .bind(micros(now))
        .execute(pool)
        .await?
        .rows_affected();

        if written == 0 {
            return Err(ChitError::CycleNotOpen(cycle_id));
        }

        let bid = queries::fetch_bid(pool, cycle_id, member_id)
            .await?
            .ok_or_else(|| {
                ChitError::InvalidState(format!("bid for cycle {} vanished", cycle_id))
            })?;

        info!(
            cycle_id,
            member_id,
            amount = %amount,
            replaced,
            "{}",
            if replaced { "Bid updated" } else { "Bid placed" }
        );

        Ok(BidReceipt { bid, replaced })
    }

    pub async fn bid_board(&self, cycle_id: CycleId) -> Result<BidBoard> {
        let cycle = self.db.get_cycle(cycle_id).await?;
        let group = self.db.get_group(cycle.group_id).await?;
        let bounds = BidBounds::for_pool(cycle.total_pool_amount, group.max_bid_reduction_pct)?;
        let bids = self.db.list_bids(cycle_id).await?;

        Ok(BidBoard {
            cycle_id,
            pool: cycle.total_pool_amount,
            min_bid: bounds.floor,
            max_bid_reduction_pct: group.max_bid_reduction_pct,
            bid_count: bids.len(),
            lowest_bid: bids.first().map(|b| b.amount),
            highest_bid: bids.iter().map(|b| b.amount).max(),
            bidding_end: cycle.bidding_end,
        })
    }

    pub async fn list_bids(&self, cycle_id: CycleId) -> Result<Vec<Bid>> {
        self.db.get_cycle(cycle_id).await?;
        self.db.list_bids(cycle_id).await
    }
}

fn validate_amount(cycle: &Cycle, group: &Group, amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(ChitError::InvalidAmount(format!(
            "bid amount must be positive, got {}",
            amount
        )));
    }

    let bounds = BidBounds::for_pool(cycle.total_pool_amount, group.max_bid_reduction_pct)?;
    if amount >= bounds.pool {
        return Err(ChitError::BidTooHigh {
            amount,
            pool: bounds.pool,
        });
    }
    if amount < bounds.floor {
        return Err(ChitError::BidBelowFloor {
            amount,
            floor: bounds.floor,
            max_reduction_pct: group.max_bid_reduction_pct,
        });
    }
    Ok(())
}
