use aloft::FetchError;
use axum::http::StatusCode;
use time::macros::date;

use crate::helpers::{
    body_json, extended_record, open_meteo_daily, spawn_app, MockNet,
};

#[tokio::test]
async fn backfill_fetches_and_persists() {
    let mut net = MockNet::new();
    net.expect_get_json()
        .times(1)
        .returning(|_| Ok(open_meteo_daily("2024-09-01", 30.0, 5, 18.5)));
    let app = spawn_app(net).await;

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({ "provider": "extended", "start_date": "2024-09-01" }),
        )
        .await;
    assert!(response.status().is_success());
    let body = body_json(response).await;
    assert_eq!(body["outcomes"][0]["kind"], "extended");
    assert_eq!(body["outcomes"][0]["status"], "fetched");

    // subsequent reads come straight from the database
    let body = app.get_json("/weather/2024-09-01").await;
    assert_eq!(body["available"], true);
    assert_eq!(body["temperature"]["value"]["high_c"], 30);
    assert_eq!(body["sources"], serde_json::json!(["extended"]));
    assert_eq!(body["any_from_cache"], true);
}

#[tokio::test]
async fn stale_data_survives_an_upstream_outage() {
    let mut net = MockNet::new();
    // one attempt plus one retry, both refused
    net.expect_get_json()
        .times(2)
        .returning(|_| Err(FetchError::Transport("connection refused".into())));
    let app = spawn_app(net).await;

    let d = date!(2024 - 08 - 12);
    app.put_record(&extended_record(d, 21, Some(40))).await;
    // well past the extended TTL
    app.backdate_all(10).await;

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({ "provider": "extended", "start_date": "2024-08-12" }),
        )
        .await;
    assert!(response.status().is_success());

    // the stale record is preserved, not evicted, and still served
    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["available"], true);
    assert_eq!(body["any_from_cache"], true);
    assert_eq!(body["temperature"]["value"]["high_c"], 21);
    assert_eq!(body["precipitation_probability"]["value"], 40);
}

#[tokio::test]
async fn inverted_date_range_is_rejected() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({
                "provider": "extended",
                "start_date": "2024-08-12",
                "end_date": "2024-08-10"
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_provider_is_rejected() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({ "provider": "bogus", "start_date": "2024-08-12" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_date_range_is_rejected() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let response = app
        .post_json(
            "/admin/refresh",
            serde_json::json!({
                "provider": "extended",
                "start_date": "2024-01-01",
                "end_date": "2024-12-31"
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
