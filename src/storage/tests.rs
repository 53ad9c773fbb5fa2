//! Unit tests for storage

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::testing::{expired_window, live_window, open_cycle, seed_group};
    use crate::types::{CycleStatus, GroupStatus, Money, NewGroup};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_create_group_and_members() {
        let db = Database::in_memory().await.unwrap();
        let group = seed_group(&db, 3, Money::from_major(500), dec!(30)).await;

        assert_eq!(group.status, GroupStatus::Active);
        assert_eq!(group.current_cycle, 1);
        assert_eq!(group.max_bid_reduction_pct, dec!(30));
        assert_eq!(db.list_members(group.id).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_create_group_validation() {
        let db = Database::in_memory().await.unwrap();

        let zero_contribution = NewGroup {
            name: "Bad".into(),
            total_members: 3,
            ..Default::default()
        };
        assert!(matches!(
            db.create_group(&zero_contribution).await,
            Err(ChitError::InvalidAmount(_))
        ));

        let bad_pct = NewGroup {
            name: "Bad".into(),
            contribution_amount: Money::from_major(100),
            total_members: 3,
            max_bid_reduction_pct: dec!(120),
            ..Default::default()
        };
        assert!(matches!(db.create_group(&bad_pct).await, Err(ChitError::Validation(_))));
    }

    #[tokio::test]
    async fn test_add_member_rejects_duplicates_and_overflow() {
        let db = Database::in_memory().await.unwrap();
        let group = seed_group(&db, 2, Money::from_major(100), dec!(40)).await;

        // Full at two members
        assert!(matches!(db.add_member(group.id, 3).await, Err(ChitError::InvalidState(_))));
        assert!(matches!(db.add_member(group.id, 1).await, Err(ChitError::InvalidState(_))));
        assert!(matches!(db.add_member(999, 1).await, Err(ChitError::GroupNotFound(999))));
    }

    #[tokio::test]
    async fn test_create_cycle_pool_and_contributions() {
        let db = Database::in_memory().await.unwrap();
        let group = seed_group(&db, 4, Money::from_major(250), dec!(40)).await;
        let cycle = open_cycle(&db, &group, live_window(Utc::now())).await;

        assert_eq!(cycle.cycle_number, 1);
        assert_eq!(cycle.total_pool_amount, Money::from_major(1000));
        assert_eq!(cycle.status, CycleStatus::Open);
        assert_eq!(cycle.version, 0);
        assert!(cycle.winner_member_id.is_none());
        assert!(cycle.is_random_winner.is_none());

        let contributions = db.contributions_for_cycle(cycle.id).await.unwrap();
        assert_eq!(contributions.len(), 4);
        assert!(contributions
            .iter()
            .all(|c| c.amount == Money::from_major(250) && c.payable_amount == c.amount));
    }

    #[tokio::test]
    async fn test_create_cycle_rejects_duplicate_number_and_bad_window() {
        let db = Database::in_memory().await.unwrap();
        let group = seed_group(&db, 2, Money::from_major(100), dec!(40)).await;
        let now = Utc::now();
        open_cycle(&db, &group, live_window(now)).await;

        // current_cycle only advances on payout approval
        let again = db.create_cycle(group.id, now, now + Duration::hours(1)).await;
        assert!(matches!(again, Err(ChitError::InvalidState(_))));

        let inverted = db.create_cycle(group.id, now, now - Duration::hours(1)).await;
        assert!(matches!(inverted, Err(ChitError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_cycle_requires_members() {
        let db = Database::in_memory().await.unwrap();
        let group = db
            .create_group(&NewGroup {
                name: "Empty".into(),
                contribution_amount: Money::from_major(100),
                total_members: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        let now = Utc::now();
        let result = db.create_cycle(group.id, now, now + Duration::hours(1)).await;
        assert!(matches!(result, Err(ChitError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_add_member_rejected_while_cycle_open() {
        let db = Database::in_memory().await.unwrap();
        let group = db
            .create_group(&NewGroup {
                name: "Filling".into(),
                contribution_amount: Money::from_major(250),
                total_members: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        for member_id in 1..=3 {
            db.add_member(group.id, member_id).await.unwrap();
        }
        let cycle = open_cycle(&db, &group, live_window(Utc::now())).await;

        let late = db.add_member(group.id, 4).await;
        assert!(matches!(late, Err(ChitError::InvalidState(_))));
        assert_eq!(db.list_members(group.id).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(db.contributions_for_cycle(cycle.id).await.unwrap().len(), 3);

        // Joining is fine again once the cycle is closed
        sqlx::query("UPDATE bidding_cycles SET status = 'closed' WHERE id = ?1")
            .bind(cycle.id)
            .execute(db.pool())
            .await
            .unwrap();
        db.add_member(group.id, 4).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_expired_open_cycles() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let live_group = seed_group(&db, 2, Money::from_major(100), dec!(40)).await;
        let expired_group = seed_group(&db, 2, Money::from_major(100), dec!(40)).await;

        open_cycle(&db, &live_group, live_window(now)).await;
        let expired = open_cycle(&db, &expired_group, expired_window(now)).await;

        assert_eq!(db.list_expired_open_cycles(now).await.unwrap(), vec![expired.id]);
        // Boundary: end == now counts as expired
        assert_eq!(
            db.list_expired_open_cycles(expired.bidding_end).await.unwrap(),
            vec![expired.id]
        );
        assert!(db
            .list_expired_open_cycles(expired.bidding_end - Duration::seconds(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_connect_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chit.db");
        let path = path.to_str().unwrap();

        let db = Database::connect(path).await.unwrap();
        let group = seed_group(&db, 2, Money::from_major(100), dec!(40)).await;
        drop(db);

        // Reopening runs migrations again without losing data
        let reopened = Database::connect(path).await.unwrap();
        assert_eq!(reopened.get_group(group.id).await.unwrap().name, "Test Chit");
    }

    #[test]
    fn test_micros_round_trip() {
        let now = Utc::now();
        let restored = from_micros(micros(now)).unwrap();
        assert_eq!(restored.timestamp_micros(), now.timestamp_micros());
        assert!(from_micros(i64::MAX).is_err());
    }
}
