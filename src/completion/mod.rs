//! Group completion
//!
//! A group is completed once every member has won an admin-approved cycle.
//! Runs after payout approval, never from the settlement engine.


use crate::error::{ChitError, Result};
use crate::storage::{micros, queries, Database};
use crate::types::{CycleId, GroupId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStatus {
    pub group_id: GroupId,
    pub distinct_winners: i64,
    pub total_members: i64,
    pub completed: bool,
    /// This call flipped the group to completed
    pub newly_completed: bool,
}

#[derive(Clone)]
pub struct CompletionWatcher {
    db: Database,
}

impl CompletionWatcher {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent: re-running on a completed group changes nothing
    pub async fn check_completion(&self, group_id: GroupId) -> Result<CompletionStatus> {
        let group = self.db.get_group(group_id).await?;

        let (distinct_winners,) = sqlx::query_as::<_, (i64,)>(
            r"
            SELECT COUNT(DISTINCT winner_member_id) FROM bidding_cycles
            WHERE group_id = ?1 AND status = 'closed' AND admin_approved = 1
              AND winner_member_id IS NOT NULL
            ",
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;

        let mut status = CompletionStatus {
            group_id,
            distinct_winners,
            total_members: group.total_members,
            completed: group.is_completed(),
            newly_completed: false,
        };

        if status.completed || distinct_winners < group.total_members {
            debug!(group_id, distinct_winners, total = group.total_members, "Group not completing");
            return Ok(status);
        }

        let flipped = sqlx::query(
            "UPDATE chit_groups SET status = 'completed' WHERE id = ?1 AND status = 'active'",
        )
        .bind(group_id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        status.completed = true;
        status.newly_completed = flipped == 1;
        if status.newly_completed {
            info!(
                group_id,
                total_members = group.total_members,
                "Group marked as completed, every member has won"
            );
        }
        Ok(status)
    }

    pub async fn approve_payout(&self, cycle_id: CycleId) -> Result<CompletionStatus> {
        self.approve_payout_at(cycle_id, Utc::now()).await
    }

    /// Record the admin payout approval, advance the group, then check completion
    pub async fn approve_payout_at(
        &self,
        cycle_id: CycleId,
        now: DateTime<Utc>,
    ) -> Result<CompletionStatus> {
        let mut tx = self.db.pool().begin().await?;

        let approved = sqlx::query(
            r"
            UPDATE bidding_cycles SET admin_approved = 1, payout_date = ?1
            WHERE id = ?2 AND status = 'closed' AND admin_approved = 0
            ",
        )
        .bind(micros(now))
        .bind(cycle_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let cycle = queries::fetch_cycle(&mut *tx, cycle_id)
            .await?
            .ok_or(ChitError::CycleNotFound(cycle_id))?;

        if approved == 0 {
            return Err(if cycle.is_open() {
                ChitError::InvalidState(format!("cycle {} is still open", cycle_id))
            } else {
                ChitError::InvalidState(format!(
                    "payout for cycle {} is already approved",
                    cycle_id
                ))
            });
        }

        sqlx::query("UPDATE chit_groups SET current_cycle = current_cycle + 1 WHERE id = ?1")
            .bind(cycle.group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(cycle_id, group_id = cycle.group_id, "Payout approved");

        self.check_completion(cycle.group_id).await
    }
}
