use axum::http::StatusCode;
use time::macros::date;

use crate::helpers::{body_json, extended_record, metar_record, spawn_app, MockNet};

#[tokio::test]
async fn unpolled_date_reports_unavailable() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["available"], false);
    assert_eq!(body["date"], "2024-08-12");
    assert!(body["sources"].as_array().unwrap().is_empty());
    assert_eq!(body["assessment"]["rating"], "good");
}

#[tokio::test]
async fn cached_record_is_served_with_attribution() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    app.put_record(&metar_record(date!(2024 - 08 - 12), 8, None)).await;

    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["available"], true);
    assert_eq!(body["wind"]["source"], "metar");
    assert_eq!(body["wind"]["value"]["speed_kt"], 8);
    assert_eq!(body["sources"], serde_json::json!(["metar"]));
    // everything read from the database is marked cached
    assert_eq!(body["any_from_cache"], true);
}

#[tokio::test]
async fn malformed_date_is_rejected() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let response = app.get("/weather/not-a-date").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("invalid date"));
}

#[tokio::test]
async fn health_reports_ok() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let body = app.get_json("/health").await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn clearing_one_family_leaves_the_rest() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let d = date!(2024 - 08 - 12);
    app.put_record(&metar_record(d, 8, None)).await;
    app.put_record(&extended_record(d, 25, Some(10))).await;

    let response = app.delete("/admin/cache?provider=extended").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["deleted"], 1);

    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["sources"], serde_json::json!(["metar"]));
}

#[tokio::test]
async fn clearing_everything_empties_the_cache() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let d = date!(2024 - 08 - 12);
    app.put_record(&metar_record(d, 8, None)).await;
    app.put_record(&extended_record(d, 25, Some(10))).await;

    let response = app.delete("/admin/cache").await;
    let body = body_json(response).await;
    assert_eq!(body["deleted"], 2);

    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["available"], false);
}
