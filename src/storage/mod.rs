//! SQLite persistence
//!
//! Owns the connection pool and schema migrations, plus the administrative
//! set-up helpers (groups, members, cycles) the settlement core depends on.

pub(crate) mod queries;

#[cfg(test)]
mod tests;

use crate::error::{ChitError, Result};
use crate::types::{
    Bid, Contribution, Cycle, CycleId, Group, GroupId, MemberId, NewGroup, ProfitDistribution,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Timestamps are persisted as microseconds since the Unix epoch
pub(crate) fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(value: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(value)
        .ok_or_else(|| ChitError::Validation(format!("timestamp {} out of range", value)))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) a file-backed database and run migrations
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ChitError::Validation(format!("cannot create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!(path, "Database ready");
        Ok(db)
    }

    /// Single-connection in-memory database for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Each connection to :memory: is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_group(&self, group: &NewGroup) -> Result<Group> {
        if !group.contribution_amount.is_positive() {
            return Err(ChitError::InvalidAmount(format!(
                "contribution amount must be positive, got {}",
                group.contribution_amount
            )));
        }
        if group.total_members <= 0 {
            return Err(ChitError::Validation("total members must be positive".into()));
        }
        if group.max_bid_reduction_pct < Decimal::ZERO
            || group.max_bid_reduction_pct > Decimal::ONE_HUNDRED
        {
            return Err(ChitError::Validation(format!(
                "max bid reduction must be between 0 and 100, got {}",
                group.max_bid_reduction_pct
            )));
        }

        let result = sqlx::query(
            r"
            INSERT INTO chit_groups
                (name, contribution_amount, total_members, cycle_duration_days,
                 max_bid_reduction_pct, current_cycle, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, 'active', ?6)
            ",
        )
        .bind(&group.name)
        .bind(group.contribution_amount.minor())
        .bind(group.total_members)
        .bind(group.cycle_duration_days)
        .bind(group.max_bid_reduction_pct.to_string())
        .bind(micros(Utc::now()))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(group_id = id, name = %group.name, "Group created");
        self.get_group(id).await
    }

    pub async fn add_member(&self, group_id: GroupId, member_id: MemberId) -> Result<()> {
        let group = self.get_group(group_id).await?;
        let members = queries::fetch_members(&self.pool, group_id).await?;
        if members.contains(&member_id) {
            return Err(ChitError::InvalidState(format!(
                "member {} is already in group {}",
                member_id, group_id
            )));
        }
        if members.len() as i64 >= group.total_members {
            return Err(ChitError::InvalidState(format!(
                "group {} is full ({} members)",
                group_id, group.total_members
            )));
        }
        // The open cycle's contribution rows are fixed at creation
        if queries::has_open_cycle(&self.pool, group_id).await? {
            return Err(ChitError::InvalidState(format!(
                "group {} has an open bidding cycle",
                group_id
            )));
        }

        let inserted = sqlx::query(
            "INSERT INTO group_members (group_id, member_id, joined_at) VALUES (?1, ?2, ?3)",
        )
        .bind(group_id)
        .bind(member_id)
        .bind(micros(Utc::now()))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(ChitError::InvalidState(format!(
                "member {} is already in group {}",
                member_id, group_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Open the group's next cycle with one contribution row per member
    pub async fn create_cycle(
        &self,
        group_id: GroupId,
        bidding_start: DateTime<Utc>,
        bidding_end: DateTime<Utc>,
    ) -> Result<Cycle> {
        if bidding_start >= bidding_end {
            return Err(ChitError::Validation(format!(
                "bidding window start {} must be before end {}",
                bidding_start, bidding_end
            )));
        }

        let mut tx = self.pool.begin().await?;

        let group = queries::fetch_group(&mut *tx, group_id)
            .await?
            .ok_or(ChitError::GroupNotFound(group_id))?;
        if group.is_completed() {
            return Err(ChitError::GroupCompleted(group_id));
        }

        let members = queries::fetch_members(&mut *tx, group_id).await?;
        if members.is_empty() {
            return Err(ChitError::InvalidState(format!(
                "group {} has no members",
                group_id
            )));
        }

        let pool_amount = group
            .contribution_amount
            .checked_mul(group.total_members)
            .ok_or_else(|| ChitError::InvalidAmount("pool amount overflows".into()))?;
        let now = micros(Utc::now());

        let inserted = sqlx::query(
            r"
            INSERT INTO bidding_cycles
                (group_id, cycle_number, bidding_start, bidding_end, total_pool_amount,
                 status, admin_approved, version, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'open', 0, 0, ?6)
            ",
        )
        .bind(group_id)
        .bind(group.current_cycle)
        .bind(micros(bidding_start))
        .bind(micros(bidding_end))
        .bind(pool_amount.minor())
        .bind(now)
        .execute(&mut *tx)
        .await;

        let cycle_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                return Err(ChitError::InvalidState(format!(
                    "cycle #{} already exists for group {}",
                    group.current_cycle, group_id
                )))
            }
            Err(e) => return Err(e.into()),
        };

        for member_id in &members {
            sqlx::query(
                r"
                INSERT INTO contributions (cycle_id, member_id, amount, payable_amount, created_at)
                VALUES (?1, ?2, ?3, ?3, ?4)
                ",
            )
            .bind(cycle_id)
            .bind(*member_id)
            .bind(group.contribution_amount.minor())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            cycle_id,
            group_id,
            cycle_number = group.current_cycle,
            pool = %pool_amount,
            members = members.len(),
            "Bidding cycle opened"
        );
        self.get_cycle(cycle_id).await
    }

    pub async fn get_group(&self, group_id: GroupId) -> Result<Group> {
        queries::fetch_group(&self.pool, group_id)
            .await?
            .ok_or(ChitError::GroupNotFound(group_id))
    }

    pub async fn get_cycle(&self, cycle_id: CycleId) -> Result<Cycle> {
        queries::fetch_cycle(&self.pool, cycle_id)
            .await?
            .ok_or(ChitError::CycleNotFound(cycle_id))
    }

    pub async fn list_cycles(&self, group_id: GroupId) -> Result<Vec<Cycle>> {
        queries::fetch_group_cycles(&self.pool, group_id).await
    }

    pub async fn list_members(&self, group_id: GroupId) -> Result<Vec<MemberId>> {
        queries::fetch_members(&self.pool, group_id).await
    }

    /// Bids in settlement order
    pub async fn list_bids(&self, cycle_id: CycleId) -> Result<Vec<Bid>> {
        queries::fetch_ranked_bids(&self.pool, cycle_id).await
    }

    pub async fn contributions_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<Contribution>> {
        queries::fetch_contributions(&self.pool, cycle_id).await
    }

    pub async fn profit_distributions_for_cycle(
        &self,
        cycle_id: CycleId,
    ) -> Result<Vec<ProfitDistribution>> {
        queries::fetch_profit_distributions(&self.pool, cycle_id).await
    }

    /// Open cycles whose bidding window ended at or before `now`
    pub async fn list_expired_open_cycles(&self, now: DateTime<Utc>) -> Result<Vec<CycleId>> {
        queries::fetch_expired_open_cycle_ids(&self.pool, now).await
    }
}
