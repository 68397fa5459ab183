use aloft::RateBudget;
use time::macros::date;
use time::Duration;

use crate::helpers::{
    extended_record, open_meteo_daily, spawn_app_with_budget, MockNet,
};

fn small_budget() -> RateBudget {
    RateBudget {
        per_minute: 10,
        per_hour: 100,
        per_day: 1000,
        margin: 0.9,
    }
}

#[tokio::test]
async fn exhausted_budget_keeps_refresh_off_the_network() {
    let mut net = MockNet::new();
    // the whole point: the refused fetch never reaches the transport
    net.expect_get_json().times(0);
    let app = spawn_app_with_budget(net, small_budget()).await;

    // nine prior fetches within the minute window spend the 10 * 0.9 margin
    for i in 0..9 {
        let d = date!(2024 - 08 - 01) + Duration::days(i);
        app.put_record(&extended_record(d, 20, None)).await;
    }

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({ "provider": "extended", "start_date": "2024-09-01" }),
        )
        .await;
    assert!(response.status().is_success());
    let body = crate::helpers::body_json(response).await;

    let outcomes = body["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 1);
    // refused with nothing cached for that date: the refusal is reported,
    // not mistaken for "provider has no data"
    let failure = outcomes[0]["status"]["failed"].as_str().unwrap();
    assert!(failure.contains("rate limit"));
}

#[tokio::test]
async fn exhausted_budget_still_serves_cached_data() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app_with_budget(net, small_budget()).await;

    for i in 0..9 {
        let d = date!(2024 - 08 - 01) + Duration::days(i);
        app.put_record(&extended_record(d, 20, None)).await;
    }

    // the first spent date has a cached record, so the refused fetch
    // degrades to it instead of failing
    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({ "provider": "extended", "start_date": "2024-08-01" }),
        )
        .await;
    let body = crate::helpers::body_json(response).await;
    assert_eq!(body["outcomes"][0]["status"], "fetched");
}

#[tokio::test]
async fn budget_under_the_margin_still_fetches() {
    let mut net = MockNet::new();
    net.expect_get_json()
        .times(1)
        .returning(|_| Ok(open_meteo_daily("2024-09-01", 28.0, 5, 18.5)));
    let app = spawn_app_with_budget(net, small_budget()).await;

    // eight spent, one under the refusal boundary
    for i in 0..8 {
        let d = date!(2024 - 08 - 01) + Duration::days(i);
        app.put_record(&extended_record(d, 20, None)).await;
    }

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({ "provider": "extended", "start_date": "2024-09-01" }),
        )
        .await;
    let body = crate::helpers::body_json(response).await;
    assert_eq!(body["outcomes"][0]["status"], "fetched");
}
