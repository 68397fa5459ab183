//! Extended-range daily forecasts from Open-Meteo (`/v1/forecast`, daily
//! block, up to 16 days out). Wind arrives in km/h.

use async_trait::async_trait;
use serde_json::Value;
use time::Date;

use super::{decode_err, kmh_to_kt, Provider, Site};
use crate::fetch::{fetch_with_retry, FetchError, RetryPolicy, Transport};
use crate::models::{NormalizedRecord, ProviderKind, WindField};

pub struct ExtendedProvider {
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl ExtendedProvider {
    pub fn new(base_url: &str, site: &Site) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude: site.latitude,
            longitude: site.longitude,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/forecast?latitude={}&longitude={}\
             &daily=temperature_2m_max,temperature_2m_min,precipitation_probability_max,\
             windspeed_10m_max,windgusts_10m_max,winddirection_10m_dominant\
             &forecast_days=16&timezone=UTC",
            self.base_url, self.latitude, self.longitude
        )
    }
}

#[async_trait]
impl Provider for ExtendedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Extended
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

pub(crate) fn day_index(daily: &Value, date: Date) -> Option<usize> {
    let date_str = format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    );
    daily["time"]
        .as_array()?
        .iter()
        .position(|t| t.as_str() == Some(date_str.as_str()))
}

pub(crate) fn daily_value(daily: &Value, field: &str, idx: usize) -> Option<f64> {
    daily[field].as_array()?.get(idx)?.as_f64()
}

pub(crate) fn daily_wind(daily: &Value, idx: usize) -> Option<WindField> {
    let speed = kmh_to_kt(daily_value(daily, "windspeed_10m_max", idx)?);
    let gust = daily_value(daily, "windgusts_10m_max", idx)
        .map(kmh_to_kt)
        .filter(|g| *g > speed);
    let direction = daily_value(daily, "winddirection_10m_dominant", idx).map(|d| d as i32);

    Some(WindField {
        direction,
        speed_kt: speed,
        gust_kt: gust,
        direction_repr: direction.map(|d| d.to_string()).unwrap_or_default(),
    })
}

pub fn parse(body: &Value, date: Date) -> Result<Option<NormalizedRecord>, FetchError> {
    let daily = &body["daily"];
    if !daily.is_object() {
        return Err(decode_err("extended body has no daily block"));
    }

    let Some(idx) = day_index(daily, date) else {
        return Ok(None);
    };

    let mut record = NormalizedRecord::new(ProviderKind::Extended, date);
    record.temperature_high_c =
        daily_value(daily, "temperature_2m_max", idx).map(|t| t.round() as i32);
    record.temperature_low_c =
        daily_value(daily, "temperature_2m_min", idx).map(|t| t.round() as i32);
    record.precipitation_probability =
        daily_value(daily, "precipitation_probability_max", idx).map(|p| p as i32);
    record.wind = daily_wind(daily, idx);

    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    fn canned() -> Value {
        json!({
            "latitude": 45.58,
            "longitude": -122.6,
            "daily": {
                "time": ["2024-08-12", "2024-08-13", "2024-08-14"],
                "temperature_2m_max": [27.4, 25.1, null],
                "temperature_2m_min": [13.6, 12.2, null],
                "precipitation_probability_max": [10, 80, null],
                "windspeed_10m_max": [18.5, 37.0, 20.0],
                "windgusts_10m_max": [29.6, 55.5, 22.0],
                "winddirection_10m_dominant": [270, 200, 180]
            }
        })
    }

    #[test]
    fn picks_the_requested_day_and_converts_units() {
        let record = parse(&canned(), date!(2024 - 08 - 13)).unwrap().unwrap();

        assert_eq!(record.temperature_high_c, Some(25));
        assert_eq!(record.temperature_low_c, Some(12));
        assert_eq!(record.precipitation_probability, Some(80));

        let wind = record.wind.unwrap();
        assert_eq!(wind.speed_kt, 20); // 37 km/h
        assert_eq!(wind.gust_kt, Some(30)); // 55.5 km/h
        assert_eq!(wind.direction, Some(200));
    }

    #[test]
    fn null_slots_become_absent_fields() {
        let record = parse(&canned(), date!(2024 - 08 - 14)).unwrap().unwrap();
        assert_eq!(record.temperature_high_c, None);
        assert_eq!(record.precipitation_probability, None);
        // wind columns still populated for that day
        assert!(record.wind.is_some());
    }

    #[test]
    fn date_outside_horizon_is_no_data() {
        assert!(parse(&canned(), date!(2024 - 09 - 01)).unwrap().is_none());
    }

    #[test]
    fn gust_below_sustained_speed_is_dropped() {
        let mut body = canned();
        body["daily"]["windgusts_10m_max"] = json!([10.0, 10.0, 10.0]);
        let record = parse(&body, date!(2024 - 08 - 13)).unwrap().unwrap();
        assert_eq!(record.wind.unwrap().gust_kt, None);
    }

    #[test]
    fn missing_daily_block_is_a_decode_error() {
        assert!(parse(&json!({"hourly": {}}), date!(2024 - 08 - 12)).is_err());
    }
}
