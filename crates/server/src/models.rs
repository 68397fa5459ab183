use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Upstream weather data families, closed set.
///
/// `Metar` and `Taf` are keyed by station identifier; the rest are keyed by
/// coordinates. `Extended`, `Hourly` and `Historical` all draw on the same
/// upstream call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Current surface observation (METAR)
    Metar,
    /// Short-range aviation forecast (TAF)
    Taf,
    /// Medium-range government forecast (NWS)
    Nws,
    /// Extended-range daily forecast
    Extended,
    /// Hourly forecast
    Hourly,
    /// Historical archive
    Historical,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Metar,
        ProviderKind::Taf,
        ProviderKind::Nws,
        ProviderKind::Extended,
        ProviderKind::Hourly,
        ProviderKind::Historical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Metar => "metar",
            ProviderKind::Taf => "taf",
            ProviderKind::Nws => "nws",
            ProviderKind::Extended => "extended",
            ProviderKind::Hourly => "hourly",
            ProviderKind::Historical => "historical",
        }
    }

    /// Families that share one upstream call budget.
    pub fn is_shared_quota(&self) -> bool {
        matches!(
            self,
            ProviderKind::Extended | ProviderKind::Hourly | ProviderKind::Historical
        )
    }

    /// Families keyed by station identifier rather than coordinates.
    pub fn is_station_keyed(&self) -> bool {
        matches!(self, ProviderKind::Metar | ProviderKind::Taf)
    }

    /// Range of day offsets (relative to local today) this family covers.
    /// `None` means the family is never swept by the steady-state poller
    /// (historical data is fetched on demand and via admin backfill only).
    pub fn poll_window(&self) -> Option<std::ops::RangeInclusive<i64>> {
        match self {
            ProviderKind::Metar => Some(0..=0),
            ProviderKind::Taf => Some(0..=1),
            ProviderKind::Nws => Some(2..=7),
            ProviderKind::Extended => Some(0..=15),
            ProviderKind::Hourly => Some(0..=15),
            ProviderKind::Historical => None,
        }
    }

    /// Whether this family has data for a date `days_out` from today.
    pub fn applies_to(&self, days_out: i64) -> bool {
        match self {
            ProviderKind::Historical => days_out < 0,
            _ => self
                .poll_window()
                .map(|w| w.contains(&days_out))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metar" => Ok(ProviderKind::Metar),
            "taf" => Ok(ProviderKind::Taf),
            "nws" => Ok(ProviderKind::Nws),
            "extended" => Ok(ProviderKind::Extended),
            "hourly" => Ok(ProviderKind::Hourly),
            "historical" => Ok(ProviderKind::Historical),
            other => Err(format!("unknown provider kind: {}", other)),
        }
    }
}

/// Where a record is anchored: a station identifier or a lat/lon pair.
///
/// Coordinate lookups match with a tolerance of 0.0001 degrees (about 11 m),
/// so tiny float drift never splits the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationKey {
    Station(String),
    Coords { lat: f64, lon: f64 },
}

impl LocationKey {
    pub const COORD_TOLERANCE: f64 = 0.0001;

    pub fn station(&self) -> Option<&str> {
        match self {
            LocationKey::Station(s) => Some(s),
            LocationKey::Coords { .. } => None,
        }
    }

    pub fn coords(&self) -> Option<(f64, f64)> {
        match self {
            LocationKey::Station(_) => None,
            LocationKey::Coords { lat, lon } => Some((*lat, *lon)),
        }
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationKey::Station(s) => f.write_str(s),
            LocationKey::Coords { lat, lon } => write!(f, "{:.4},{:.4}", lat, lon),
        }
    }
}

/// Wind as reported by a provider, normalized to knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindField {
    /// Degrees true (0-360); `None` when variable or calm
    pub direction: Option<i32>,
    pub speed_kt: i32,
    pub gust_kt: Option<i32>,
    /// Provider's own rendering, e.g. "270" or "VRB"
    pub direction_repr: String,
}

impl WindField {
    pub fn is_gusty(&self) -> bool {
        self.gust_kt.map(|g| g > self.speed_kt).unwrap_or(false)
    }

    /// Difference between gust and sustained speed.
    pub fn gust_spread(&self) -> Option<i32> {
        self.gust_kt.map(|g| g - self.speed_kt)
    }

    /// Compass point for the direction, "VRB" when variable.
    pub fn direction_compass(&self) -> &'static str {
        const POINTS: [&str; 16] = [
            "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
            "NW", "NNW",
        ];
        match self.direction {
            Some(deg) => {
                let idx = ((deg as f64 / 22.5).round() as usize) % 16;
                POINTS[idx]
            }
            None => "VRB",
        }
    }
}

/// Single cloud layer from an observation or aviation forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudLayer {
    /// FEW, SCT, BKN, OVC, CLR, SKC, VV
    pub coverage: String,
    /// Feet AGL; `None` for CLR/SKC
    pub altitude_ft: Option<i32>,
}

impl CloudLayer {
    /// Layers that constitute a ceiling.
    pub fn is_ceiling(&self) -> bool {
        matches!(self.coverage.as_str(), "BKN" | "OVC" | "VV")
    }
}

/// One hour of an hourly forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyEntry {
    pub time: PrimitiveDateTime,
    pub temperature_c: f64,
    pub wind_speed_kt: i32,
    pub wind_direction: Option<i32>,
    pub wind_gust_kt: Option<i32>,
    pub precipitation_probability: Option<i32>,
    pub weather_code: Option<i32>,
}

/// One provider's normalized answer for one target date.
///
/// Immutable once constructed; the store stamps `from_cache` when it hands a
/// persisted copy back out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub kind: ProviderKind,
    pub target_date: Date,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub observation_time: Option<OffsetDateTime>,
    pub wind: Option<WindField>,
    /// Statute miles
    pub visibility_sm: Option<f64>,
    #[serde(default)]
    pub clouds: Vec<CloudLayer>,
    /// Cloud-base height of the lowest BKN/OVC/VV layer, feet AGL
    pub ceiling_ft: Option<i32>,
    pub temperature_high_c: Option<i32>,
    pub temperature_low_c: Option<i32>,
    /// Percent, 0-100
    pub precipitation_probability: Option<i32>,
    /// Millimeters, historical archive only
    pub precipitation_sum_mm: Option<f64>,
    #[serde(default)]
    pub hours: Vec<HourlyEntry>,
    /// Raw METAR/TAF text when the provider supplies one
    pub raw: Option<String>,
    /// Provider-declared flight rules (VFR/MVFR/IFR/LIFR)
    pub flight_rules: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(default, skip_serializing)]
    pub from_cache: bool,
}

impl NormalizedRecord {
    /// Empty shell for a provider and date; parsers fill in what they find.
    pub fn new(kind: ProviderKind, target_date: Date) -> Self {
        Self {
            kind,
            target_date,
            observation_time: None,
            wind: None,
            visibility_sm: None,
            clouds: Vec::new(),
            ceiling_ft: None,
            temperature_high_c: None,
            temperature_low_c: None,
            precipitation_probability: None,
            precipitation_sum_mm: None,
            hours: Vec::new(),
            raw: None,
            flight_rules: None,
            fetched_at: OffsetDateTime::now_utc(),
            from_cache: false,
        }
    }

    /// Derive the ceiling from parsed cloud layers.
    pub fn ceiling_from_clouds(clouds: &[CloudLayer]) -> Option<i32> {
        clouds
            .iter()
            .filter(|c| c.is_ceiling())
            .filter_map(|c| c.altitude_ft)
            .min()
    }

    pub fn into_cached(mut self, fetched_at: OffsetDateTime) -> Self {
        self.fetched_at = fetched_at;
        self.from_cache = true;
        self
    }
}
