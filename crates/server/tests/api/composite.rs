use aloft::WindField;
use time::macros::date;

use crate::helpers::{extended_record, metar_record, spawn_app, MockNet};

#[tokio::test]
async fn dangerous_gusts_drive_a_no_fly_rating() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    app.put_record(&metar_record(date!(2024 - 08 - 12), 22, Some(30))).await;

    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["assessment"]["rating"], "no-fly");
    let reasons: Vec<String> = body["assessment"]["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_str().unwrap().to_string())
        .collect();
    assert!(reasons.contains(&"Wind too strong: 22 kt".to_string()));
    assert!(reasons.contains(&"Dangerous gusts: 30 kt".to_string()));
}

#[tokio::test]
async fn forecast_only_dates_rate_on_what_exists() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    app.put_record(&extended_record(date!(2024 - 08 - 20), 25, Some(80))).await;

    let body = app.get_json("/weather/2024-08-20").await;
    assert_eq!(body["available"], true);
    assert!(body["wind"].is_null());
    assert_eq!(body["temperature"]["source"], "extended");
    assert_eq!(body["temperature"]["value"]["high_c"], 25);
    assert_eq!(body["precipitation_probability"]["value"], 80);

    // no wind data, so no wind reasons; only the rain chance triggers
    assert_eq!(body["assessment"]["rating"], "poor");
    let reasons = body["assessment"]["reasons"].as_array().unwrap();
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0], "High rain chance: 80%");
}

#[tokio::test]
async fn observation_outranks_forecast_for_shared_fields() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let d = date!(2024 - 08 - 12);
    let mut forecast = extended_record(d, 25, Some(10));
    forecast.wind = Some(WindField {
        direction: Some(180),
        speed_kt: 5,
        gust_kt: None,
        direction_repr: "180".into(),
    });
    app.put_record(&forecast).await;
    app.put_record(&metar_record(d, 12, None)).await;

    let body = app.get_json("/weather/2024-08-12").await;
    assert_eq!(body["wind"]["source"], "metar");
    assert_eq!(body["wind"]["value"]["speed_kt"], 12);
    // both families still show up as contributors
    assert_eq!(body["sources"], serde_json::json!(["metar", "extended"]));
}

#[tokio::test]
async fn range_endpoint_returns_the_full_horizon() {
    let mut net = MockNet::new();
    net.expect_get_json().times(0);
    let app = spawn_app(net).await;

    let body = app.get_json("/weather").await;
    let days = body.as_array().unwrap();
    assert_eq!(days.len(), 16);
    assert!(days.iter().all(|d| d["available"] == false));
}
