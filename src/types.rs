//! Core domain types

use crate::error::{ChitError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

pub type GroupId = i64;
pub type CycleId = i64;
pub type MemberId = i64;

/// Currency amount held as integer minor units (1/100 of the unit)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    const SCALE: u32 = 2;

    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Whole currency units, e.g. `Money::from_major(1000)` is 1000.00
    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Exact conversion; more than two fractional digits is rejected
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        let normalized = value.normalize();
        if normalized.scale() > Self::SCALE {
            return Err(ChitError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                value,
                Self::SCALE
            )));
        }
        let minor = value
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|m| i64::try_from(m.trunc()).ok())
            .ok_or_else(|| ChitError::InvalidAmount(format!("{} is out of range", value)))?;
        Ok(Money(minor))
    }

    /// Rounds up to the minor unit
    pub fn from_decimal_ceil(value: Decimal) -> Result<Self> {
        let rounded =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::ToPositiveInfinity);
        Self::from_decimal(rounded)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    /// Integer split into `parts` equal shares plus the leftover minor units
    pub fn split(self, parts: i64) -> (Money, Money) {
        if parts <= 0 {
            return (Money::ZERO, self);
        }
        (Money(self.0 / parts), Money(self.0 % parts))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = ChitError;

    fn try_from(value: Decimal) -> Result<Self> {
        Money::from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.to_decimal()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.to_decimal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Completed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Active => "active",
            GroupStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(GroupStatus::Active),
            "completed" => Ok(GroupStatus::Completed),
            other => Err(ChitError::InvalidState(format!("unknown group status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Open,
    Closed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Open => "open",
            CycleStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(CycleStatus::Open),
            "closed" => Ok(CycleStatus::Closed),
            other => Err(ChitError::InvalidState(format!("unknown cycle status '{}'", other))),
        }
    }
}

/// A rotating-savings group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub contribution_amount: Money,
    pub total_members: i64,
    pub cycle_duration_days: i64,
    /// Bounds how far below the pool a bid may go (e.g. 40 = 40%)
    pub max_bid_reduction_pct: Decimal,
    pub current_cycle: i64,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_completed(&self) -> bool {
        self.status == GroupStatus::Completed
    }
}

/// Parameters for a new group
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub contribution_amount: Money,
    pub total_members: i64,
    pub cycle_duration_days: i64,
    pub max_bid_reduction_pct: Decimal,
}

impl Default for NewGroup {
    fn default() -> Self {
        use rust_decimal_macros::dec;
        Self {
            name: String::new(),
            contribution_amount: Money::ZERO,
            total_members: 0,
            cycle_duration_days: 30,
            max_bid_reduction_pct: dec!(40),
        }
    }
}

/// One round of contribution, bidding and settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    pub group_id: GroupId,
    pub cycle_number: i64,
    pub bidding_start: DateTime<Utc>,
    pub bidding_end: DateTime<Utc>,
    pub total_pool_amount: Money,
    pub status: CycleStatus,
    pub winner_member_id: Option<MemberId>,
    pub winning_bid_amount: Option<Money>,
    /// `None` while open, `Some(true)` when chosen by fallback draw
    pub is_random_winner: Option<bool>,
    pub admin_approved: bool,
    pub payout_date: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Cycle {
    pub fn is_open(&self) -> bool {
        self.status == CycleStatus::Open
    }

    /// Whether `now` falls inside the inclusive bidding window
    pub fn accepts_bids_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.bidding_start && now <= self.bidding_end
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.bidding_end <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: i64,
    pub cycle_id: CycleId,
    pub member_id: MemberId,
    pub amount: Money,
    pub bid_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: i64,
    pub cycle_id: CycleId,
    pub member_id: MemberId,
    pub amount: Money,
    pub payable_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitDistribution {
    pub id: i64,
    pub cycle_id: CycleId,
    pub member_id: MemberId,
    pub profit_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// Per-member outcome of a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberShare {
    pub member_id: MemberId,
    pub profit_share: Money,
    pub payable_amount: Money,
}

/// Result of settling one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub cycle_id: CycleId,
    pub group_id: GroupId,
    pub cycle_number: i64,
    pub winner_member_id: MemberId,
    pub winning_bid: Money,
    pub payout_amount: Money,
    pub profit_amount: Money,
    pub profit_per_member: Money,
    /// Leftover minor units of the split, credited to the winner
    pub profit_remainder: Money,
    pub is_random_winner: bool,
    pub member_count: usize,
    pub shares: Vec<MemberShare>,
    pub settled_at: DateTime<Utc>,
}

impl SettlementSummary {
    pub fn share_of(&self, member_id: MemberId) -> Option<&MemberShare> {
        self.shares.iter().find(|s| s.member_id == member_id)
    }
}
