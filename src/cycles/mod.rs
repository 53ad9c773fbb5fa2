//! Opening bidding cycles
//!
//! Creates the group's next cycle and, once it is committed, announces it to
//! the members through the notification dispatcher.


use crate::error::Result;
use crate::notify::NotificationDispatcher;
use crate::storage::Database;
use crate::types::{Cycle, GroupId};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct CycleOpener {
    db: Database,
    notifications: NotificationDispatcher,
}

impl CycleOpener {
    pub fn new(db: Database, notifications: NotificationDispatcher) -> Self {
        Self { db, notifications }
    }

    /// Open the next cycle and announce it unless `announce` is false
    pub async fn open_cycle(
        &self,
        group_id: GroupId,
        bidding_start: DateTime<Utc>,
        bidding_end: DateTime<Utc>,
        announce: bool,
    ) -> Result<Cycle> {
        self.open_and_announce(group_id, bidding_start, bidding_end, announce)
            .await
            .map(|(cycle, _)| cycle)
    }

    /// Same as [`open_cycle`](Self::open_cycle), also returning the delivery
    /// task so callers can wait for it
    pub async fn open_and_announce(
        &self,
        group_id: GroupId,
        bidding_start: DateTime<Utc>,
        bidding_end: DateTime<Utc>,
        announce: bool,
    ) -> Result<(Cycle, Option<JoinHandle<()>>)> {
        let cycle = self
            .db
            .create_cycle(group_id, bidding_start, bidding_end)
            .await?;
        if !announce {
            return Ok((cycle, None));
        }

        let group = self.db.get_group(group_id).await?;
        let members = self.db.list_members(group_id).await?;
        let notice = NotificationDispatcher::cycle_opened_notice(&group, &cycle, &members);
        let handle = self.notifications.announce_cycle(notice);
        Ok((cycle, Some(handle)))
    }
}
