//! Reader endpoints. These touch the database only; nothing here can reach
//! upstream providers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use time::{Date, Duration, OffsetDateTime};

use super::ApiError;
use crate::merge::CompositeView;
use crate::providers::Site;
use crate::service::read_composite;
use crate::startup::AppState;

const DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]");

/// How far forward the range endpoint reports, matching the longest
/// forecast horizon.
const RANGE_DAYS: i64 = 16;

#[derive(Debug, Deserialize, Default)]
pub struct LocationQuery {
    pub station: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Per-request site override; untouched fields keep the configured site.
fn resolve_site(base: &Site, query: &LocationQuery) -> Site {
    Site {
        station: query.station.clone().unwrap_or_else(|| base.station.clone()),
        latitude: query.lat.unwrap_or(base.latitude),
        longitude: query.lon.unwrap_or(base.longitude),
    }
}

fn parse_date(raw: &str) -> Result<Date, ApiError> {
    Date::parse(raw, &DATE_FORMAT)
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {} (expected YYYY-MM-DD)", raw)))
}

/// GET /weather/{date}
pub async fn weather_for_date(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<CompositeView>, ApiError> {
    let date = parse_date(&date)?;
    let site = resolve_site(&state.site, &query);
    let view = read_composite(state.reader.as_ref(), &site, date).await?;
    Ok(Json(view))
}

/// GET /weather — composites for today through the forecast horizon.
pub async fn weather_range(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<Vec<CompositeView>>, ApiError> {
    let site = resolve_site(&state.site, &query);
    let today = OffsetDateTime::now_utc().to_offset(state.utc_offset).date();

    let mut views = Vec::with_capacity(RANGE_DAYS as usize);
    for days_out in 0..RANGE_DAYS {
        let date = today + Duration::days(days_out);
        views.push(read_composite(state.reader.as_ref(), &site, date).await?);
    }
    Ok(Json(views))
}
