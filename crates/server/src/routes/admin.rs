//! Operator endpoints: backfill, cache clear, health. These are the only
//! routes wired to the fetch side of the service.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{Date, Duration};

use super::ApiError;
use crate::db::WeatherStore;
use crate::models::ProviderKind;
use crate::service::RefreshOutcome;
use crate::startup::AppState;

const DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]");

/// Upper bound on one backfill request, keeps a typo from sweeping years.
const MAX_REFRESH_DAYS: i64 = 92;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Provider family name, or "all".
    #[serde(default)]
    pub provider: Option<String>,
    pub start_date: String,
    /// Inclusive; defaults to `start_date`.
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub outcomes: Vec<RefreshOutcome>,
}

fn parse_date(raw: &str) -> Result<Date, ApiError> {
    Date::parse(raw, &DATE_FORMAT)
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {} (expected YYYY-MM-DD)", raw)))
}

fn parse_kinds(provider: Option<&str>) -> Result<Vec<ProviderKind>, ApiError> {
    match provider {
        None | Some("all") => Ok(ProviderKind::ALL.to_vec()),
        Some(name) => name
            .parse::<ProviderKind>()
            .map(|kind| vec![kind])
            .map_err(ApiError::BadRequest),
    }
}

/// POST /admin/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let kinds = parse_kinds(request.provider.as_deref())?;
    let start = parse_date(&request.start_date)?;
    let end = match &request.end_date {
        Some(raw) => parse_date(raw)?,
        None => start,
    };

    if end < start {
        return Err(ApiError::BadRequest("end_date precedes start_date".into()));
    }
    let span = (end - start).whole_days() + 1;
    if span > MAX_REFRESH_DAYS {
        return Err(ApiError::BadRequest(format!(
            "date range too large ({} days, max {})",
            span, MAX_REFRESH_DAYS
        )));
    }

    let dates: Vec<Date> = (0..span).map(|d| start + Duration::days(d)).collect();
    let outcomes = state.service.refresh(kinds, dates).await;
    Ok(Json(RefreshResponse { outcomes }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ClearQuery {
    /// Provider family to clear; everything when absent.
    pub provider: Option<String>,
}

/// DELETE /admin/cache
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<Value>, ApiError> {
    let kind = match query.provider.as_deref() {
        None | Some("all") => None,
        Some(name) => Some(name.parse::<ProviderKind>().map_err(ApiError::BadRequest)?),
    };

    let deleted = state.db.clear(kind).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state
        .db
        .health_check()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_selector_accepts_all_and_names() {
        assert_eq!(parse_kinds(None).unwrap().len(), 6);
        assert_eq!(parse_kinds(Some("all")).unwrap().len(), 6);
        assert_eq!(parse_kinds(Some("metar")).unwrap(), vec![ProviderKind::Metar]);
        assert!(parse_kinds(Some("bogus")).is_err());
    }
}
