//! Current surface observations via AVWX (`/api/metar/{station}`).

use async_trait::async_trait;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};

use super::{decode_err, Provider, Site};
use crate::fetch::{fetch_with_retry, FetchError, RetryPolicy, Transport};
use crate::models::{CloudLayer, NormalizedRecord, ProviderKind, WindField};

pub struct MetarProvider {
    base_url: String,
    token: String,
    station: String,
}

impl MetarProvider {
    pub fn new(base_url: &str, token: &str, site: &Site) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            station: site.station.clone(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/metar/{}?token={}",
            self.base_url, self.station, self.token
        )
    }
}

#[async_trait]
impl Provider for MetarProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Metar
    }

    async fn fetch(
        &self,
        transport: &dyn Transport,
        policy: &RetryPolicy,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, FetchError> {
        match fetch_with_retry(transport, &self.url(), policy).await? {
            Some(body) => Ok(Some(parse(&body, date)?)),
            None => Ok(None),
        }
    }
}

fn field_value(v: &Value) -> Option<f64> {
    v.get("value").and_then(Value::as_f64)
}

pub(crate) fn parse_wind(body: &Value) -> Option<WindField> {
    let speed = field_value(&body["wind_speed"])? as i32;
    let direction = field_value(&body["wind_direction"]).map(|d| d as i32);
    let direction_repr = body["wind_direction"]["repr"]
        .as_str()
        .unwrap_or("VRB")
        .to_string();
    let gust = field_value(&body["wind_gust"]).map(|g| g as i32);

    Some(WindField {
        direction,
        speed_kt: speed,
        gust_kt: gust,
        direction_repr,
    })
}

/// Cloud altitudes arrive in hundreds of feet.
pub(crate) fn parse_clouds(clouds: &Value) -> Vec<CloudLayer> {
    clouds
        .as_array()
        .map(|layers| {
            layers
                .iter()
                .filter_map(|layer| {
                    let coverage = layer["type"].as_str()?.to_string();
                    let altitude_ft = layer["altitude"].as_f64().map(|a| (a * 100.0) as i32);
                    Some(CloudLayer {
                        coverage,
                        altitude_ft,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse(body: &Value, date: Date) -> Result<NormalizedRecord, FetchError> {
    if !body.is_object() {
        return Err(decode_err("metar body is not an object"));
    }

    let mut record = NormalizedRecord::new(ProviderKind::Metar, date);
    record.wind = parse_wind(body);
    record.visibility_sm = field_value(&body["visibility"]);
    record.clouds = parse_clouds(&body["clouds"]);
    record.ceiling_ft = NormalizedRecord::ceiling_from_clouds(&record.clouds);

    if let Some(temp) = field_value(&body["temperature"]) {
        // a point observation bounds both ends of the day's range
        record.temperature_high_c = Some(temp.round() as i32);
        record.temperature_low_c = Some(temp.round() as i32);
    }

    record.raw = body["raw"].as_str().map(str::to_string);
    record.flight_rules = body["flight_rules"].as_str().map(str::to_string);
    record.observation_time = body["time"]["dt"]
        .as_str()
        .and_then(|dt| OffsetDateTime::parse(dt, &Rfc3339).ok());

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    fn canned() -> Value {
        json!({
            "raw": "KPDX 121853Z 27012G18KT 10SM FEW050 BKN080 28/14 A3002",
            "station": "KPDX",
            "time": {"dt": "2024-08-12T18:53:00Z", "repr": "121853Z"},
            "wind_direction": {"value": 270, "repr": "270"},
            "wind_speed": {"value": 12, "repr": "12"},
            "wind_gust": {"value": 18, "repr": "18"},
            "visibility": {"value": 10, "repr": "10"},
            "temperature": {"value": 28},
            "clouds": [
                {"type": "FEW", "altitude": 50, "repr": "FEW050"},
                {"type": "BKN", "altitude": 80, "repr": "BKN080"}
            ],
            "flight_rules": "VFR"
        })
    }

    #[test]
    fn parses_full_observation() {
        let record = parse(&canned(), date!(2024 - 08 - 12)).unwrap();

        let wind = record.wind.unwrap();
        assert_eq!(wind.direction, Some(270));
        assert_eq!(wind.speed_kt, 12);
        assert_eq!(wind.gust_kt, Some(18));

        assert_eq!(record.visibility_sm, Some(10.0));
        // altitudes normalize from hundreds of feet
        assert_eq!(record.ceiling_ft, Some(8000));
        assert_eq!(record.temperature_high_c, Some(28));
        assert_eq!(record.flight_rules.as_deref(), Some("VFR"));
        assert!(record.raw.is_some());
        assert!(record.observation_time.is_some());
    }

    #[test]
    fn variable_wind_keeps_repr_without_direction() {
        let mut body = canned();
        body["wind_direction"] = json!({"value": null, "repr": "VRB"});
        let record = parse(&body, date!(2024 - 08 - 12)).unwrap();

        let wind = record.wind.unwrap();
        assert_eq!(wind.direction, None);
        assert_eq!(wind.direction_repr, "VRB");
    }

    #[test]
    fn clear_skies_have_no_ceiling() {
        let mut body = canned();
        body["clouds"] = json!([{"type": "CLR", "altitude": null, "repr": "CLR"}]);
        let record = parse(&body, date!(2024 - 08 - 12)).unwrap();
        assert_eq!(record.ceiling_ft, None);
        assert_eq!(record.clouds.len(), 1);
    }

    #[test]
    fn missing_wind_is_tolerated() {
        let mut body = canned();
        body["wind_speed"] = json!({"value": null});
        let record = parse(&body, date!(2024 - 08 - 12)).unwrap();
        assert!(record.wind.is_none());
    }

    #[test]
    fn non_object_body_is_a_decode_error() {
        assert!(parse(&json!([1, 2]), date!(2024 - 08 - 12)).is_err());
    }
}
