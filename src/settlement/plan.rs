//! Winner selection and profit split
//!
//! Pure functions over already-loaded rows. The engine feeds these from inside
//! its settlement transaction.

use crate::error::{ChitError, Result};
use crate::types::{Bid, Contribution, CycleId, MemberId, MemberShare, Money};
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// How the winner was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerSelection {
    LowestBid { member_id: MemberId, amount: Money },
    Random { member_id: MemberId },
}

impl WinnerSelection {
    pub fn member_id(&self) -> MemberId {
        match self {
            WinnerSelection::LowestBid { member_id, .. }
            | WinnerSelection::Random { member_id } => *member_id,
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, WinnerSelection::Random { .. })
    }
}

/// Equal division of the discount across every participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitSplit {
    pub total: Money,
    pub per_member: Money,
    pub remainder: Money,
    /// Members that took leftover units, winner first
    pub remainder_to: Vec<MemberId>,
    pub shares: HashMap<MemberId, Money>,
}

impl ProfitSplit {
    pub fn none() -> Self {
        Self {
            total: Money::ZERO,
            per_member: Money::ZERO,
            remainder: Money::ZERO,
            remainder_to: Vec::new(),
            shares: HashMap::new(),
        }
    }

    pub fn share_of(&self, member_id: MemberId) -> Money {
        self.shares.get(&member_id).copied().unwrap_or(Money::ZERO)
    }

    pub fn has_profit(&self) -> bool {
        self.total.is_positive()
    }
}

/// Everything settlement needs to know about a cycle, read in one transaction
#[derive(Debug, Clone)]
pub struct PlanInput<'a> {
    pub cycle_id: CycleId,
    pub pool: Money,
    /// Ranked: amount ascending, then submission time ascending
    pub bids: &'a [Bid],
    /// Ascending member ids
    pub members: &'a [MemberId],
    pub previous_winners: &'a [MemberId],
    pub contributions: &'a [Contribution],
    pub default_contribution: Money,
}

#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub winner: WinnerSelection,
    pub winning_bid: Money,
    pub split: ProfitSplit,
    pub shares: Vec<MemberShare>,
    /// New payable amount per contribution row id
    pub payable_updates: Vec<(i64, Money)>,
}

/// Member and contribution owed for this cycle, ascending by member id.
///
/// The cycle's contribution rows define who takes part. Legacy cycles without
/// rows fall back to the group roster at the default contribution.
pub fn participants(input: &PlanInput<'_>) -> Vec<(MemberId, Money)> {
    let mut rows: Vec<(MemberId, Money)> = if input.contributions.is_empty() {
        input
            .members
            .iter()
            .map(|&m| (m, input.default_contribution))
            .collect()
    } else {
        input
            .contributions
            .iter()
            .map(|c| (c.member_id, c.amount))
            .collect()
    };
    rows.sort_by_key(|(member_id, _)| *member_id);
    rows
}

/// Lowest bid wins; with no bids, draw uniformly among participants who never won
pub fn select_winner<R: Rng>(
    input: &PlanInput<'_>,
    rng: &mut R,
) -> Result<WinnerSelection> {
    if let Some(best) = input.bids.first() {
        return Ok(WinnerSelection::LowestBid {
            member_id: best.member_id,
            amount: best.amount,
        });
    }

    let won: HashSet<MemberId> = input.previous_winners.iter().copied().collect();
    let eligible: Vec<MemberId> = participants(input)
        .into_iter()
        .map(|(m, _)| m)
        .filter(|m| !won.contains(m))
        .collect();

    if eligible.is_empty() {
        return Err(ChitError::NoEligibleWinner(input.cycle_id));
    }

    let index = rng.random_range(0..eligible.len());
    Ok(WinnerSelection::Random {
        member_id: eligible[index],
    })
}

/// Floor division in minor units across `participants`.
///
/// Leftover units go to the winner up to the contribution they owe, and any
/// rest to the other participants in ascending id order under the same cap, so
/// no payable amount drops below zero. Units that cannot be
/// placed under that cap stay with the winner; [`build_plan`] rejects such a
/// split.
pub fn split_profit(
    pool: Money,
    winning_bid: Money,
    winner: MemberId,
    participants: &[(MemberId, Money)],
) -> ProfitSplit {
    let profit = pool - winning_bid;
    if !profit.is_positive() || participants.is_empty() {
        return ProfitSplit::none();
    }

    let (per_member, remainder) = profit.split(participants.len() as i64);
    let mut shares: HashMap<MemberId, Money> =
        participants.iter().map(|&(m, _)| (m, per_member)).collect();

    let order = participants
        .iter()
        .filter(|(m, _)| *m == winner)
        .chain(participants.iter().filter(|(m, _)| *m != winner));

    let mut left = remainder;
    let mut remainder_to = Vec::new();
    for &(member_id, owed) in order {
        if !left.is_positive() {
            break;
        }
        let share = shares.entry(member_id).or_insert(per_member);
        let room = owed - *share;
        if room.is_positive() {
            let extra = left.min(room);
            *share = *share + extra;
            left = left - extra;
            remainder_to.push(member_id);
        }
    }
    if left.is_positive() {
        let fallback = if shares.contains_key(&winner) {
            winner
        } else {
            participants[0].0
        };
        if let Some(share) = shares.get_mut(&fallback) {
            *share = *share + left;
        }
    }

    ProfitSplit {
        total: profit,
        per_member,
        remainder,
        remainder_to,
        shares,
    }
}

pub fn build_plan<R: Rng>(input: &PlanInput<'_>, rng: &mut R) -> Result<SettlementPlan> {
    let winner = select_winner(input, rng)?;
    let winning_bid = match winner {
        WinnerSelection::LowestBid { amount, .. } => amount,
        WinnerSelection::Random { .. } => input.pool,
    };

    let participants = participants(input);
    let split = split_profit(input.pool, winning_bid, winner.member_id(), &participants);

    let shares: Vec<MemberShare> = participants
        .iter()
        .map(|&(member_id, owed)| {
            let profit_share = split.share_of(member_id);
            MemberShare {
                member_id,
                profit_share,
                payable_amount: owed - profit_share,
            }
        })
        .collect();

    if let Some(short) = shares.iter().find(|s| s.payable_amount.is_negative()) {
        return Err(ChitError::InvalidAmount(format!(
            "profit {} exceeds what member {} owes in cycle {}",
            split.total, short.member_id, input.cycle_id
        )));
    }

    let payable_updates = input
        .contributions
        .iter()
        .map(|c| (c.id, c.amount - split.share_of(c.member_id)))
        .collect();

    Ok(SettlementPlan {
        winner,
        winning_bid,
        split,
        shares,
        payable_updates,
    })
}
