//! HTTP handler tests

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::ScannerConfig;
    use crate::cycles::CycleOpener;
    use crate::notify::NotificationDispatcher;
    use crate::storage::Database;
    use crate::testing::{expired_window, live_window, open_cycle, seed_group};
    use crate::types::{Cycle, Money};
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> (Database, Router) {
        let db = Database::in_memory().await.unwrap();
        let engine = Arc::new(
            SettlementEngine::new(db.clone(), NotificationDispatcher::disabled()).with_seed(3),
        );
        let scanner = Arc::new(ExpiryScanner::new(engine.clone(), &ScannerConfig::default()));
        let state = Arc::new(AppState {
            opener: CycleOpener::new(db.clone(), NotificationDispatcher::disabled()),
            ledger: BidLedger::new(db.clone()),
            engine,
            scanner,
            completion: CompletionWatcher::new(db.clone()),
            request_check: None,
        });
        (db, create_router(state))
    }

    async fn cycle(db: &Database, expired: bool) -> Cycle {
        let group = seed_group(db, 4, Money::from_major(250), dec!(40)).await;
        let now = Utc::now();
        let window = if expired { expired_window(now) } else { live_window(now) };
        open_cycle(db, &group, window).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post(uri: String, header: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (_db, app) = app().await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_place_bid() {
        let (db, app) = app().await;
        let cycle = cycle(&db, false).await;
        let uri = format!("/cycles/{}/bids", cycle.id);

        let first = Some(serde_json::json!({ "amount": "750.00" }));
        let (status, body) = send(&app, post(uri.clone(), Some((MEMBER_HEADER, "2")), first)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bid"]["amount"], "750.00");
        assert_eq!(body["replaced"], false);

        let second = Some(serde_json::json!({ "amount": 700 }));
        let (status, body) = send(&app, post(uri, Some((MEMBER_HEADER, "2")), second)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replaced"], true);
    }

    #[tokio::test]
    async fn test_place_bid_errors() {
        let (db, app) = app().await;
        let cycle = cycle(&db, false).await;
        let uri = format!("/cycles/{}/bids", cycle.id);
        let bid = || Some(serde_json::json!({ "amount": "800.00" }));

        let (status, _) = send(&app, post(uri.clone(), None, bid())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, post(uri.clone(), Some((MEMBER_HEADER, "99")), bid())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let low = Some(serde_json::json!({ "amount": "100.00" }));
        let (status, body) = send(&app, post(uri.clone(), Some((MEMBER_HEADER, "1")), low)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("minimum"));

        let (status, _) = send(
            &app,
            post(format!("/cycles/{}/bids", cycle.id + 50), Some((MEMBER_HEADER, "1")), bid()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_place_bid_with_three_decimals_is_json_error() {
        let (db, app) = app().await;
        let cycle = cycle(&db, false).await;
        let uri = format!("/cycles/{}/bids", cycle.id);

        let precise = Some(serde_json::json!({ "amount": "750.005" }));
        let (status, body) = send(&app, post(uri, Some((MEMBER_HEADER, "2")), precise)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("decimal places"));
        assert!(db.list_bids(cycle.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_cycle() {
        let (db, app) = app().await;
        let group = seed_group(&db, 4, Money::from_major(250), dec!(40)).await;
        let uri = format!("/groups/{}/cycles", group.id);
        let (start, end) = live_window(Utc::now());
        let window = || Some(serde_json::json!({ "bidding_start": start, "bidding_end": end }));

        let (status, _) = send(&app, post(uri.clone(), None, window())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let admin = Some((ADMIN_HEADER, "1"));
        let (status, body) = send(&app, post(uri.clone(), admin, window())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["cycle_number"], 1);
        assert_eq!(body["total_pool_amount"], "1000.00");
        assert_eq!(body["status"], "open");

        // current_cycle only moves on payout approval
        let (status, body) = send(&app, post(uri, admin, window())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("already exists"));

        let quiet = Some(serde_json::json!({
            "bidding_start": end,
            "bidding_end": start,
            "notify": false,
        }));
        let other = seed_group(&db, 2, Money::from_major(100), dec!(40)).await;
        let (status, _) = send(
            &app,
            post(format!("/groups/{}/cycles", other.id), admin, quiet),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bid_board() {
        let (db, app) = app().await;
        let cycle = cycle(&db, false).await;

        let request = Request::builder()
            .uri(format!("/cycles/{}/board", cycle.id))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["min_bid"], "600.00");
        assert_eq!(body["bid_count"], 0);
    }

    #[tokio::test]
    async fn test_settle_requires_admin_and_conflicts_on_repeat() {
        let (db, app) = app().await;
        let cycle = cycle(&db, true).await;
        let uri = format!("/cycles/{}/settle", cycle.id);

        let (status, _) = send(&app, post(uri.clone(), None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, post(uri.clone(), Some((ADMIN_HEADER, "1")), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_random_winner"], true);
        assert_eq!(body["winning_bid"], "1000.00");

        let (status, body) = send(&app, post(uri, Some((ADMIN_HEADER, "1")), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already closed"));
    }

    #[tokio::test]
    async fn test_close_expired() {
        let (db, app) = app().await;
        cycle(&db, true).await;
        cycle(&db, false).await;

        let (status, body) = send(
            &app,
            post("/cycles/close-expired".to_string(), Some((ADMIN_HEADER, "1")), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["closed"], 1);

        let (_, body) = send(
            &app,
            post("/cycles/close-expired".to_string(), Some((ADMIN_HEADER, "1")), None),
        )
        .await;
        assert_eq!(body["closed"], 0);
        assert_eq!(body["message"], "No expired cycles to close");
    }

    #[tokio::test]
    async fn test_approve_payout() {
        let (db, app) = app().await;
        let cycle = cycle(&db, true).await;
        let approve = format!("/cycles/{}/approve-payout", cycle.id);

        let (status, _) = send(&app, post(approve.clone(), Some((ADMIN_HEADER, "1")), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let settle = format!("/cycles/{}/settle", cycle.id);
        send(&app, post(settle, Some((ADMIN_HEADER, "1")), None)).await;
        let (status, body) = send(&app, post(approve, Some((ADMIN_HEADER, "1")), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["distinct_winners"], 1);
        assert_eq!(body["completed"], false);
    }
}
