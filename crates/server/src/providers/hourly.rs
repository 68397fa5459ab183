//! Hour-by-hour forecasts from Open-Meteo. Hourly records carry only the
//! per-hour detail; they never win a daily merge slot.

use async_trait::async_trait;
use serde_json::Value;
use time::{Date, PrimitiveDateTime};

use super::{decode_err, kmh_to_kt, Provider, Site};
use crate::fetch::{fetch_with_retry, FetchError, RetryPolicy, Transport};
use crate::models::{HourlyEntry, NormalizedRecord, ProviderKind};

const HOUR_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]");

pub struct HourlyProvider {
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl HourlyProvider {
    pub fn new(base_url: &str, site: &Site) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude: site.latitude,
            longitude: site.longitude,
        }
    }

    fn url(&self, date: Date) -> String {
        let day = format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            date.month() as u8,
            date.day()
        );
        format!(
            "{}/forecast?latitude={}&longitude={}\
             &hourly=temperature_2m,windspeed_10m,winddirection_10m,windgusts_10m,\
             precipitation_probability,weathercode\
             &start_date={day}&end_date={day}&timezone=UTC",
            self.base_url, self.latitude, self.longitude
        )
    }
}

#[async_trait]
impl Provider for HourlyProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hourly
    }

    async fn fetch(
        &self,
        transport: &dyn Transport,
        policy: &RetryPolicy,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, FetchError> {
        match fetch_with_retry(transport, &self.url(date), policy).await? {
            Some(body) => parse(&body, date),
            None => Ok(None),
        }
    }
}

fn hourly_value(hourly: &Value, field: &str, idx: usize) -> Option<f64> {
    hourly[field].as_array()?.get(idx)?.as_f64()
}

pub fn parse(body: &Value, date: Date) -> Result<Option<NormalizedRecord>, FetchError> {
    let hourly = &body["hourly"];
    let times = hourly["time"]
        .as_array()
        .ok_or_else(|| decode_err("hourly body has no time axis"))?;

    let mut hours = Vec::new();
    for (idx, t) in times.iter().enumerate() {
        let Some(stamp) = t.as_str() else { continue };
        let Ok(when) = PrimitiveDateTime::parse(stamp, &HOUR_FORMAT) else {
            continue;
        };
        if when.date() != date {
            continue;
        }
        let Some(temperature_c) = hourly_value(hourly, "temperature_2m", idx) else {
            continue;
        };

        let wind_speed_kt = hourly_value(hourly, "windspeed_10m", idx)
            .map(kmh_to_kt)
            .unwrap_or(0);

        hours.push(HourlyEntry {
            time: when,
            temperature_c,
            wind_speed_kt,
            wind_direction: hourly_value(hourly, "winddirection_10m", idx).map(|d| d as i32),
            wind_gust_kt: hourly_value(hourly, "windgusts_10m", idx)
                .map(kmh_to_kt)
                .filter(|g| *g > wind_speed_kt),
            precipitation_probability: hourly_value(hourly, "precipitation_probability", idx)
                .map(|p| p as i32),
            weather_code: hourly_value(hourly, "weathercode", idx).map(|c| c as i32),
        });
    }

    if hours.is_empty() {
        return Ok(None);
    }

    let mut record = NormalizedRecord::new(ProviderKind::Hourly, date);
    record.hours = hours;
    Ok(Some(record))
}
