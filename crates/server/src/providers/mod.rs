//! Thin upstream adapters. Each module builds one provider's URL and parses
//! its JSON into a [`NormalizedRecord`]; parsing is pure and unit-tested
//! from canned payloads.

pub mod extended;
pub mod historical;
pub mod hourly;
pub mod metar;
pub mod nws;
pub mod taf;

use async_trait::async_trait;
use time::Date;

use crate::fetch::{FetchError, RetryPolicy, Transport};
use crate::models::{LocationKey, NormalizedRecord, ProviderKind};

/// The one configured flight site: a reporting station plus coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub station: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Site {
    /// Cache key appropriate for a provider family.
    pub fn location_key(&self, kind: ProviderKind) -> LocationKey {
        if kind.is_station_keyed() {
            LocationKey::Station(self.station.clone())
        } else {
            LocationKey::Coords {
                lat: self.latitude,
                lon: self.longitude,
            }
        }
    }
}

/// One upstream weather source. `Ok(None)` means the upstream has no data
/// for the requested date, which is an answer, not a failure.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn fetch(
        &self,
        transport: &dyn Transport,
        policy: &RetryPolicy,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, FetchError>;
}

pub(crate) fn mph_to_kt(mph: f64) -> i32 {
    (mph * 0.869).round() as i32
}

pub(crate) fn kmh_to_kt(kmh: f64) -> i32 {
    (kmh * 0.539957).round() as i32
}

pub(crate) fn fahrenheit_to_c(f: f64) -> i32 {
    ((f - 32.0) * 5.0 / 9.0).round() as i32
}

/// Compass point to degrees true, for providers that report "NW" style
/// directions.
pub(crate) fn compass_to_degrees(compass: &str) -> Option<i32> {
    let deg = match compass.to_uppercase().as_str() {
        "N" => 0,
        "NNE" => 22,
        "NE" => 45,
        "ENE" => 67,
        "E" => 90,
        "ESE" => 112,
        "SE" => 135,
        "SSE" => 157,
        "S" => 180,
        "SSW" => 202,
        "SW" => 225,
        "WSW" => 247,
        "W" => 270,
        "WNW" => 292,
        "NW" => 315,
        "NNW" => 337,
        _ => return None,
    };
    Some(deg)
}

pub(crate) fn decode_err(context: &str) -> FetchError {
    FetchError::Decode(context.to_string())
}
