//! Read helpers shared by the ledger, the settlement engine and the watcher
//!
//! Every function takes a generic executor so it can run against the pool or
//! inside an open transaction.

use super::{from_micros, micros};
use crate::error::{ChitError, Result};
use crate::types::{
    Bid, Contribution, Cycle, CycleId, CycleStatus, Group, GroupId, GroupStatus, MemberId, Money,
    ProfitDistribution,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use std::str::FromStr;

const CYCLE_COLUMNS: &str = "id, group_id, cycle_number, bidding_start, bidding_end, \
     total_pool_amount, status, winner_member_id, winning_bid_amount, is_random_winner, \
     admin_approved, payout_date, version";

fn group_from_row(row: &SqliteRow) -> Result<Group> {
    let pct: String = row.try_get("max_bid_reduction_pct")?;
    let max_bid_reduction_pct = Decimal::from_str(&pct)
        .map_err(|e| ChitError::Validation(format!("bad reduction percentage '{}': {}", pct, e)))?;
    let status: String = row.try_get("status")?;

    Ok(Group {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        contribution_amount: Money::from_minor(row.try_get("contribution_amount")?),
        total_members: row.try_get("total_members")?,
        cycle_duration_days: row.try_get("cycle_duration_days")?,
        max_bid_reduction_pct,
        current_cycle: row.try_get("current_cycle")?,
        status: GroupStatus::parse(&status)?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

fn cycle_from_row(row: &SqliteRow) -> Result<Cycle> {
    let status: String = row.try_get("status")?;
    let payout_date: Option<i64> = row.try_get("payout_date")?;
    let winning_bid: Option<i64> = row.try_get("winning_bid_amount")?;

    Ok(Cycle {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        cycle_number: row.try_get("cycle_number")?,
        bidding_start: from_micros(row.try_get("bidding_start")?)?,
        bidding_end: from_micros(row.try_get("bidding_end")?)?,
        total_pool_amount: Money::from_minor(row.try_get("total_pool_amount")?),
        status: CycleStatus::parse(&status)?,
        winner_member_id: row.try_get("winner_member_id")?,
        winning_bid_amount: winning_bid.map(Money::from_minor),
        is_random_winner: row.try_get("is_random_winner")?,
        admin_approved: row.try_get("admin_approved")?,
        payout_date: payout_date.map(from_micros).transpose()?,
        version: row.try_get("version")?,
    })
}

fn bid_from_row(row: &SqliteRow) -> Result<Bid> {
    Ok(Bid {
        id: row.try_get("id")?,
        cycle_id: row.try_get("cycle_id")?,
        member_id: row.try_get("member_id")?,
        amount: Money::from_minor(row.try_get("amount")?),
        bid_time: from_micros(row.try_get("bid_time")?)?,
    })
}

pub(crate) async fn fetch_group<'e, E>(executor: E, group_id: GroupId) -> Result<Option<Group>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, name, contribution_amount, total_members, cycle_duration_days, \
         max_bid_reduction_pct, current_cycle, status, created_at \
         FROM chit_groups WHERE id = ?1",
    )
    .bind(group_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(group_from_row).transpose()
}

pub(crate) async fn fetch_cycle<'e, E>(executor: E, cycle_id: CycleId) -> Result<Option<Cycle>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM bidding_cycles WHERE id = ?1", CYCLE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(cycle_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(cycle_from_row).transpose()
}

pub(crate) async fn fetch_group_cycles<'e, E>(executor: E, group_id: GroupId) -> Result<Vec<Cycle>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM bidding_cycles WHERE group_id = ?1 ORDER BY cycle_number ASC",
        CYCLE_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(group_id).fetch_all(executor).await?;

    rows.iter().map(cycle_from_row).collect()
}

/// Member ids of a group in ascending order
pub(crate) async fn fetch_members<'e, E>(executor: E, group_id: GroupId) -> Result<Vec<MemberId>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT member_id FROM group_members WHERE group_id = ?1 ORDER BY member_id ASC",
    )
    .bind(group_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn is_member<'e, E>(
    executor: E,
    group_id: GroupId,
    member_id: MemberId,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND member_id = ?2",
    )
    .bind(group_id)
    .bind(member_id)
    .fetch_one(executor)
    .await?;

    Ok(row.0 > 0)
}

/// Bids ranked for settlement: lowest amount first, then earliest submission
pub(crate) async fn fetch_ranked_bids<'e, E>(executor: E, cycle_id: CycleId) -> Result<Vec<Bid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, cycle_id, member_id, amount, bid_time FROM bids \
         WHERE cycle_id = ?1 ORDER BY amount ASC, bid_time ASC, id ASC",
    )
    .bind(cycle_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(bid_from_row).collect()
}

pub(crate) async fn fetch_bid<'e, E>(
    executor: E,
    cycle_id: CycleId,
    member_id: MemberId,
) -> Result<Option<Bid>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, cycle_id, member_id, amount, bid_time FROM bids \
         WHERE cycle_id = ?1 AND member_id = ?2",
    )
    .bind(cycle_id)
    .bind(member_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(bid_from_row).transpose()
}

/// Winners of closed cycles in the group, skipping `exclude_cycle`
pub(crate) async fn fetch_previous_winners<'e, E>(
    executor: E,
    group_id: GroupId,
    exclude_cycle: CycleId,
) -> Result<Vec<MemberId>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT DISTINCT winner_member_id FROM bidding_cycles \
         WHERE group_id = ?1 AND status = 'closed' AND winner_member_id IS NOT NULL AND id != ?2",
    )
    .bind(group_id)
    .bind(exclude_cycle)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn has_won_before<'e, E>(
    executor: E,
    group_id: GroupId,
    member_id: MemberId,
    exclude_cycle: CycleId,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM bidding_cycles \
         WHERE group_id = ?1 AND winner_member_id = ?2 AND status = 'closed' AND id != ?3",
    )
    .bind(group_id)
    .bind(member_id)
    .bind(exclude_cycle)
    .fetch_one(executor)
    .await?;

    Ok(row.0 > 0)
}

pub(crate) async fn fetch_contributions<'e, E>(
    executor: E,
    cycle_id: CycleId,
) -> Result<Vec<Contribution>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, cycle_id, member_id, amount, payable_amount FROM contributions \
         WHERE cycle_id = ?1 ORDER BY member_id ASC",
    )
    .bind(cycle_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Contribution {
                id: row.try_get("id")?,
                cycle_id: row.try_get("cycle_id")?,
                member_id: row.try_get("member_id")?,
                amount: Money::from_minor(row.try_get("amount")?),
                payable_amount: Money::from_minor(row.try_get("payable_amount")?),
            })
        })
        .collect()
}

pub(crate) async fn fetch_profit_distributions<'e, E>(
    executor: E,
    cycle_id: CycleId,
) -> Result<Vec<ProfitDistribution>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, cycle_id, member_id, profit_amount, created_at FROM profit_distributions \
         WHERE cycle_id = ?1 ORDER BY member_id ASC",
    )
    .bind(cycle_id)
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ProfitDistribution {
                id: row.try_get("id")?,
                cycle_id: row.try_get("cycle_id")?,
                member_id: row.try_get("member_id")?,
                profit_amount: Money::from_minor(row.try_get("profit_amount")?),
                created_at: from_micros(row.try_get("created_at")?)?,
            })
        })
        .collect()
}

pub(crate) async fn fetch_expired_open_cycle_ids<'e, E>(
    executor: E,
    now: DateTime<Utc>,
) -> Result<Vec<CycleId>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM bidding_cycles WHERE status = 'open' AND bidding_end <= ?1 \
         ORDER BY bidding_end ASC, id ASC",
    )
    .bind(micros(now))
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn has_open_cycle<'e, E>(executor: E, group_id: GroupId) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM bidding_cycles WHERE group_id = ?1 AND status = 'open'",
    )
    .bind(group_id)
    .fetch_one(executor)
    .await?;

    Ok(row.0 > 0)
}
