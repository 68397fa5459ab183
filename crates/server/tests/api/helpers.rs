use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use hyper::{header, Method};
use mockall::mock;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime, UtcOffset};
use tower::ServiceExt;

use aloft::{
    app, build_providers, AppState, Cli, FetchError, NormalizedRecord, ProviderKind, RateBudget,
    RateLimiter, RetryPolicy, Site, SqliteStore, Transport, WeatherService, WeatherStore,
    WindField,
};
use aloft::utils::{TtlConfig, UpstreamConfig};

mock! {
    pub Net {}

    #[async_trait]
    impl Transport for Net {
        async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: Arc<SqliteStore>,
    pub site: Site,
    _data_dir: tempfile::TempDir,
}

pub async fn spawn_app(transport: MockNet) -> TestApp {
    spawn_app_with_budget(transport, RateBudget::default()).await
}

pub async fn spawn_app_with_budget(transport: MockNet, budget: RateBudget) -> TestApp {
    let data_dir = tempfile::TempDir::new().expect("temp dir");
    let store = Arc::new(
        SqliteStore::new(data_dir.path().to_str().unwrap())
            .await
            .expect("sqlite store"),
    );

    let cli = Cli {
        avwx_token: Some("test-token".into()),
        ..Default::default()
    };
    let site = Site {
        station: cli.station(),
        latitude: cli.latitude(),
        longitude: cli.longitude(),
    };
    let providers = build_providers(&cli, &UpstreamConfig::default(), &site);

    let service = Arc::new(WeatherService::new(
        store.clone(),
        Arc::new(transport),
        providers,
        RateLimiter::new(budget),
        RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        },
        TtlConfig::default(),
        site.clone(),
        time::Duration::minutes(10),
    ));

    let state = AppState {
        reader: store.clone(),
        service,
        db: store.clone(),
        site: site.clone(),
        utc_offset: UtcOffset::UTC,
    };

    TestApp {
        app: app(state),
        store,
        site,
        _data_dir: data_dir,
    }
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method(Method::GET)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert!(
            response.status().is_success(),
            "GET {} returned {}",
            path,
            response.status()
        );
        body_json(response).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Response<Body> {
        self.request(
            Request::builder()
                .method(Method::POST)
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, path: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method(Method::DELETE)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn put_record(&self, record: &NormalizedRecord) {
        let key = self.site.location_key(record.kind);
        self.store.put(record, &key, None).await.expect("put record");
    }

    /// Rewrite every stored fetch timestamp, for TTL and staleness tests.
    pub async fn backdate_all(&self, hours: i64) {
        let to = OffsetDateTime::now_utc() - time::Duration::hours(hours);
        let to = to.replace_nanosecond(0).unwrap().to_offset(UtcOffset::UTC);
        let ts = to.format(&Rfc3339).unwrap();
        sqlx::query("UPDATE weather_records SET fetched_at = ?")
            .bind(&ts)
            .execute(self.store.pool())
            .await
            .expect("backdate");
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn metar_record(date: Date, speed_kt: i32, gust_kt: Option<i32>) -> NormalizedRecord {
    let mut record = NormalizedRecord::new(ProviderKind::Metar, date);
    record.wind = Some(WindField {
        direction: Some(270),
        speed_kt,
        gust_kt,
        direction_repr: "270".into(),
    });
    record.visibility_sm = Some(10.0);
    record.temperature_high_c = Some(22);
    record.temperature_low_c = Some(22);
    record
}

pub fn extended_record(date: Date, high_c: i32, precip: Option<i32>) -> NormalizedRecord {
    let mut record = NormalizedRecord::new(ProviderKind::Extended, date);
    record.temperature_high_c = Some(high_c);
    record.temperature_low_c = Some(high_c - 10);
    record.precipitation_probability = precip;
    record
}

/// Canned Open-Meteo daily payload covering exactly one date.
pub fn open_meteo_daily(date: &str, high_c: f64, precip: i64, wind_kmh: f64) -> Value {
    serde_json::json!({
        "daily": {
            "time": [date],
            "temperature_2m_max": [high_c],
            "temperature_2m_min": [high_c - 10.0],
            "precipitation_probability_max": [precip],
            "windspeed_10m_max": [wind_kmh],
            "windgusts_10m_max": [wind_kmh],
            "winddirection_10m_dominant": [270]
        }
    })
}
