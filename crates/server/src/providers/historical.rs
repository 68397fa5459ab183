//! Past observations from the Open-Meteo archive endpoint. Only consulted
//! for dates before today, via on-demand reads and admin backfill.

use async_trait::async_trait;
use serde_json::Value;
use time::Date;

use super::extended::{daily_value, daily_wind, day_index};
use super::{decode_err, Provider, Site};
use crate::fetch::{fetch_with_retry, FetchError, RetryPolicy, Transport};
use crate::models::{NormalizedRecord, ProviderKind};

pub struct HistoricalProvider {
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl HistoricalProvider {
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
            "{}/archive?latitude={}&longitude={}\
             &daily=temperature_2m_max,temperature_2m_min,precipitation_sum,\
             windspeed_10m_max,windgusts_10m_max,winddirection_10m_dominant\
             &start_date={day}&end_date={day}&timezone=UTC",
            self.base_url, self.latitude, self.longitude
        )
    }
}

#[async_trait]
impl Provider for HistoricalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Historical
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

pub fn parse(body: &Value, date: Date) -> Result<Option<NormalizedRecord>, FetchError> {
    let daily = &body["daily"];
    if !daily.is_object() {
        return Err(decode_err("archive body has no daily block"));
    }

    let Some(idx) = day_index(daily, date) else {
        return Ok(None);
    };

    let mut record = NormalizedRecord::new(ProviderKind::Historical, date);
    record.temperature_high_c =
        daily_value(daily, "temperature_2m_max", idx).map(|t| t.round() as i32);
    record.temperature_low_c =
        daily_value(daily, "temperature_2m_min", idx).map(|t| t.round() as i32);
    record.precipitation_sum_mm = daily_value(daily, "precipitation_sum", idx);
    record.wind = daily_wind(daily, idx);

    // the archive backfills with a lag; a day of all-null columns is absent
    if record.temperature_high_c.is_none()
        && record.temperature_low_c.is_none()
        && record.wind.is_none()
        && record.precipitation_sum_mm.is_none()
    {
        return Ok(None);
    }

    Ok(Some(record))
}
