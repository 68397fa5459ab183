use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::{
    body::Body,
    extract::Request,
    middleware::{self, Next},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use hyper::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use log::info;
use time::UtcOffset;
use tower_http::cors::{Any, CorsLayer};

use crate::db::{SqliteStore, WeatherReader};
use crate::fetch::HttpTransport;
use crate::providers::Site;
use crate::rate_limit::RateLimiter;
use crate::routes::{
    admin::{clear_cache, health, refresh},
    weather::{weather_for_date, weather_range},
};
use crate::service::{build_providers, WeatherService};
use crate::utils::{Cli, Tuning};

#[derive(Clone)]
pub struct AppState {
    /// Read-only capability handed to the query routes.
    pub reader: Arc<dyn WeatherReader>,
    /// Fetch-capable service; admin routes only.
    pub service: Arc<WeatherService>,
    pub db: Arc<SqliteStore>,
    pub site: Site,
    pub utc_offset: UtcOffset,
}

pub async fn build_app_state(cli: &Cli, tuning: &Tuning) -> Result<AppState, anyhow::Error> {
    let db = Arc::new(
        SqliteStore::new(&cli.data_dir())
            .await
            .map_err(|e| anyhow!("error setting up SQLite store: {}", e))?,
    );

    let site = Site {
        station: cli.station(),
        latitude: cli.latitude(),
        longitude: cli.longitude(),
    };

    let transport = Arc::new(
        HttpTransport::new(tuning.retry.timeout())
            .map_err(|e| anyhow!("error building HTTP client: {}", e))?,
    );
    let providers = build_providers(cli, &tuning.upstream, &site);

    let service = Arc::new(WeatherService::new(
        db.clone(),
        transport,
        providers,
        RateLimiter::new(tuning.rate),
        tuning.retry.policy(),
        tuning.ttl.clone(),
        site.clone(),
        time::Duration::seconds(tuning.poll.cooldown_secs),
    ));

    let utc_offset = UtcOffset::from_hms(tuning.retention.utc_offset_hours, 0, 0)
        .context("invalid utc_offset_hours")?;

    Ok(AppState {
        reader: db.clone(),
        service,
        db,
        site,
        utc_offset,
    })
}

pub fn app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        // reader routes (database only)
        .route("/weather", get(weather_range))
        .route("/weather/{date}", get(weather_for_date))
        // operator routes
        .route("/admin/refresh", post(refresh))
        .route("/admin/cache", delete(clear_cache))
        .route("/health", get(health))
        .with_state(Arc::new(app_state))
        .layer(middleware::from_fn(log_request))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}
