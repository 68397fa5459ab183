//! Medium-range forecasts from the National Weather Service
//! (api.weather.gov). The gridpoint forecast URL is resolved from the site
//! coordinates once and reused; deployments can pin it in config to skip
//! the points lookup entirely.

use async_trait::async_trait;
use serde_json::Value;
use time::Date;
use tokio::sync::OnceCell;

use super::{compass_to_degrees, decode_err, mph_to_kt, Provider, Site};
use crate::fetch::{fetch_with_retry, FetchError, RetryPolicy, Transport};
use crate::models::{NormalizedRecord, ProviderKind, WindField};

pub struct NwsProvider {
    base_url: String,
    latitude: f64,
    longitude: f64,
    configured_forecast_url: Option<String>,
    resolved_forecast_url: OnceCell<String>,
}

impl NwsProvider {
    pub fn new(base_url: &str, site: &Site, forecast_url: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude: site.latitude,
            longitude: site.longitude,
            configured_forecast_url: forecast_url,
            resolved_forecast_url: OnceCell::new(),
        }
    }

    async fn forecast_url(
        &self,
        transport: &dyn Transport,
        policy: &RetryPolicy,
    ) -> Result<String, FetchError> {
        if let Some(url) = &self.configured_forecast_url {
            return Ok(url.clone());
        }

        self.resolved_forecast_url
            .get_or_try_init(|| async {
                let points_url = format!(
                    "{}/points/{:.4},{:.4}",
                    self.base_url, self.latitude, self.longitude
                );
                let body = fetch_with_retry(transport, &points_url, policy)
                    .await?
                    .ok_or_else(|| decode_err("points lookup returned no data"))?;
                body["properties"]["forecast"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| decode_err("points response missing forecast url"))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Provider for NwsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nws
    }

    async fn fetch(
        &self,
        transport: &dyn Transport,
        policy: &RetryPolicy,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, FetchError> {
        let url = self.forecast_url(transport, policy).await?;
        match fetch_with_retry(transport, &url, policy).await? {
            Some(body) => parse(&body, date),
            None => Ok(None),
        }
    }
}

/// NWS reports wind as prose: "10 mph" or "5 to 15 mph". The higher bound
/// is the planning number.
pub(crate) fn parse_wind_speed_kt(text: &str) -> Option<i32> {
    let max_mph = text
        .split_whitespace()
        .filter_map(|token| token.parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, n| {
            Some(acc.map_or(n, |a| a.max(n)))
        })?;
    Some(mph_to_kt(max_mph))
}

fn period_date(period: &Value) -> Option<&str> {
    // the leading "YYYY-MM-DD" of the period's own local start time; a
    // startTime too short (or split mid-character) is a skipped period
    period["startTime"].as_str().and_then(|s| s.get(..10))
}

fn period_wind(period: &Value) -> Option<WindField> {
    let speed = parse_wind_speed_kt(period["windSpeed"].as_str()?)?;
    let repr = period["windDirection"].as_str().unwrap_or("").to_string();
    let gust = period["windGust"]
        .as_str()
        .and_then(parse_wind_speed_kt)
        .filter(|g| *g > speed);

    Some(WindField {
        direction: compass_to_degrees(&repr),
        speed_kt: speed,
        gust_kt: gust,
        direction_repr: repr,
    })
}

pub fn parse(body: &Value, date: Date) -> Result<Option<NormalizedRecord>, FetchError> {
    let periods = body["properties"]["periods"]
        .as_array()
        .ok_or_else(|| decode_err("nws body has no forecast periods"))?;

    let date_str = format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    );

    let mut record = NormalizedRecord::new(ProviderKind::Nws, date);
    let mut found = false;

    for period in periods {
        if period_date(period) != Some(date_str.as_str()) {
            continue;
        }
        found = true;

        let is_daytime = period["isDaytime"].as_bool().unwrap_or(false);
        if let Some(temp_f) = period["temperature"].as_f64() {
            let temp_c = super::fahrenheit_to_c(temp_f);
            if is_daytime {
                record.temperature_high_c = Some(temp_c);
            } else {
                record.temperature_low_c = Some(temp_c);
            }
        }

        if let Some(wind) = period_wind(period) {
            let replace = record
                .wind
                .as_ref()
                .map(|w| wind.speed_kt > w.speed_kt)
                .unwrap_or(true);
            if replace {
                record.wind = Some(wind);
            }
        }

        if let Some(precip) = period["probabilityOfPrecipitation"]["value"].as_i64() {
            let precip = precip as i32;
            record.precipitation_probability = Some(
                record
                    .precipitation_probability
                    .map_or(precip, |p| p.max(precip)),
            );
        }
    }

    if !found {
        return Ok(None);
    }
    Ok(Some(record))
}
