//! Short-range aviation forecasts via AVWX (`/api/taf/{station}`).
//!
//! A TAF is a sequence of forecast periods; for a target date we take the
//! worst case across every period that overlaps that UTC day.

use async_trait::async_trait;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};

use super::metar::{parse_clouds, parse_wind};
use super::{decode_err, Provider, Site};
use crate::fetch::{fetch_with_retry, FetchError, RetryPolicy, Transport};
use crate::models::{NormalizedRecord, ProviderKind, WindField};

pub struct TafProvider {
    base_url: String,
    token: String,
    station: String,
}

impl TafProvider {
    pub fn new(base_url: &str, token: &str, site: &Site) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            station: site.station.clone(),
        }
    }

    fn url(&self) -> String {
        format!("{}/taf/{}?token={}", self.base_url, self.station, self.token)
    }
}

#[async_trait]
impl Provider for TafProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Taf
    }

    async fn fetch(
        &self,
        transport: &dyn Transport,
        policy: &RetryPolicy,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, FetchError> {
        match fetch_with_retry(transport, &self.url(), policy).await? {
            Some(body) => parse(&body, date),
            None => Ok(None),
        }
    }
}

fn period_time(period: &Value, field: &str) -> Option<OffsetDateTime> {
    period[field]["dt"]
        .as_str()
        .and_then(|dt| OffsetDateTime::parse(dt, &Rfc3339).ok())
}

/// Severity key for choosing the worst wind of the day.
fn wind_severity(wind: &WindField) -> i32 {
    wind.gust_kt.unwrap_or(wind.speed_kt).max(wind.speed_kt)
}

pub fn parse(body: &Value, date: Date) -> Result<Option<NormalizedRecord>, FetchError> {
    let periods = body["forecast"]
        .as_array()
        .ok_or_else(|| decode_err("taf body has no forecast periods"))?;

    let day_start = date.midnight().assume_utc();
    let day_end = day_start + time::Duration::days(1);

    let mut worst_wind: Option<WindField> = None;
    let mut min_visibility: Option<f64> = None;
    let mut min_ceiling: Option<i32> = None;
    let mut any_overlap = false;

    for period in periods {
        let (Some(start), Some(end)) = (
            period_time(period, "start_time"),
            period_time(period, "end_time"),
        ) else {
            continue;
        };
        if start >= day_end || end <= day_start {
            continue;
        }
        any_overlap = true;

        if let Some(wind) = parse_wind(period) {
            let replace = worst_wind
                .as_ref()
                .map(|w| wind_severity(&wind) > wind_severity(w))
                .unwrap_or(true);
            if replace {
                worst_wind = Some(wind);
            }
        }

        if let Some(vis) = period["visibility"]["value"].as_f64() {
            min_visibility = Some(min_visibility.map_or(vis, |v: f64| v.min(vis)));
        }

        let clouds = parse_clouds(&period["clouds"]);
        if let Some(ceiling) = NormalizedRecord::ceiling_from_clouds(&clouds) {
            min_ceiling = Some(min_ceiling.map_or(ceiling, |c: i32| c.min(ceiling)));
        }
    }

    if !any_overlap {
        return Ok(None);
    }

    let mut record = NormalizedRecord::new(ProviderKind::Taf, date);
    record.wind = worst_wind;
    record.visibility_sm = min_visibility;
    record.ceiling_ft = min_ceiling;
    record.raw = body["raw"].as_str().map(str::to_string);
    record.observation_time = body["time"]["dt"]
        .as_str()
        .and_then(|dt| OffsetDateTime::parse(dt, &Rfc3339).ok());

    Ok(Some(record))
}
