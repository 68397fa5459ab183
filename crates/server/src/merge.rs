//! Composite merge: reconcile overlapping provider records for one date into
//! a single per-field-attributed view, plus the derived flight-safety rating.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::models::{HourlyEntry, NormalizedRecord, ProviderKind, WindField};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Fixed source priority per logical field, highest first.
const WIND_PRIORITY: [ProviderKind; 5] = [
    ProviderKind::Metar,
    ProviderKind::Taf,
    ProviderKind::Nws,
    ProviderKind::Extended,
    ProviderKind::Historical,
];
const TEMPERATURE_PRIORITY: [ProviderKind; 4] = [
    ProviderKind::Metar,
    ProviderKind::Nws,
    ProviderKind::Extended,
    ProviderKind::Historical,
];
/// Only surface-aviation providers report ceiling and visibility.
const CEILING_VISIBILITY_PRIORITY: [ProviderKind; 2] = [ProviderKind::Metar, ProviderKind::Taf];
const PRECIPITATION_PRIORITY: [ProviderKind; 2] = [ProviderKind::Nws, ProviderKind::Extended];

/// A merged field value together with the provider that supplied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource<T> {
    pub value: T,
    pub source: ProviderKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub high_c: Option<i32>,
    pub low_c: Option<i32>,
}

/// Overall flyability bucket; ordering is severity (worst last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlightRating {
    Good,
    Marginal,
    Poor,
    NoFly,
}

impl std::fmt::Display for FlightRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlightRating::Good => "good",
            FlightRating::Marginal => "marginal",
            FlightRating::Poor => "poor",
            FlightRating::NoFly => "no-fly",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightAssessment {
    pub rating: FlightRating,
    /// Triggering conditions in source order: wind, gust, visibility,
    /// ceiling, precipitation. Deterministic for identical inputs.
    pub reasons: Vec<String>,
}

impl FlightAssessment {
    pub fn good() -> Self {
        Self {
            rating: FlightRating::Good,
            reasons: Vec::new(),
        }
    }
}

/// The merged per-date answer. Never persisted; recomputed on demand from
/// whatever records currently exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeView {
    #[serde(with = "iso_date")]
    pub date: Date,
    /// False when no provider has ever produced data for this date.
    pub available: bool,
    pub wind: Option<FieldSource<WindField>>,
    pub temperature: Option<FieldSource<TemperatureRange>>,
    pub ceiling_ft: Option<FieldSource<i32>>,
    pub visibility_sm: Option<FieldSource<f64>>,
    pub precipitation_probability: Option<FieldSource<i32>>,
    #[serde(default)]
    pub hours: Vec<HourlyEntry>,
    pub sources: Vec<ProviderKind>,
    pub any_from_cache: bool,
    pub assessment: FlightAssessment,
}

impl CompositeView {
    /// Explicit "no data" view; readers get this instead of an error.
    pub fn empty(date: Date) -> Self {
        Self {
            date,
            available: false,
            wind: None,
            temperature: None,
            ceiling_ft: None,
            visibility_sm: None,
            precipitation_probability: None,
            hours: Vec::new(),
            sources: Vec::new(),
            any_from_cache: false,
            assessment: FlightAssessment::good(),
        }
    }
}

fn record_for<'a>(
    records: &'a [NormalizedRecord],
    kind: ProviderKind,
) -> Option<&'a NormalizedRecord> {
    records.iter().find(|r| r.kind == kind)
}

fn first_with<'a, T, F>(
    records: &'a [NormalizedRecord],
    priority: &[ProviderKind],
    extract: F,
) -> Option<FieldSource<T>>
where
    F: Fn(&'a NormalizedRecord) -> Option<T>,
{
    for kind in priority {
        if let Some(record) = record_for(records, *kind) {
            if let Some(value) = extract(record) {
                return Some(FieldSource {
                    value,
                    source: *kind,
                });
            }
        }
    }
    None
}

/// Merge the records available for one date into a composite view.
///
/// Walks each field's fixed priority list and takes the first provider with a
/// non-absent value; zero contributing records yields an explicit empty view.
pub fn merge(date: Date, records: &[NormalizedRecord]) -> CompositeView {
    if records.is_empty() {
        return CompositeView::empty(date);
    }

    let wind = first_with(records, &WIND_PRIORITY, |r| r.wind.clone());
    let temperature = first_with(records, &TEMPERATURE_PRIORITY, |r| {
        if r.temperature_high_c.is_some() || r.temperature_low_c.is_some() {
            Some(TemperatureRange {
                high_c: r.temperature_high_c,
                low_c: r.temperature_low_c,
            })
        } else {
            None
        }
    });
    let ceiling_ft = first_with(records, &CEILING_VISIBILITY_PRIORITY, |r| r.ceiling_ft);
    let visibility_sm = first_with(records, &CEILING_VISIBILITY_PRIORITY, |r| r.visibility_sm);
    let precipitation_probability =
        first_with(records, &PRECIPITATION_PRIORITY, |r| r.precipitation_probability);

    let hours = record_for(records, ProviderKind::Hourly)
        .map(|r| r.hours.clone())
        .unwrap_or_default();

    // Contributors in a fixed order so identical inputs render identically.
    let sources: Vec<ProviderKind> = ProviderKind::ALL
        .iter()
        .copied()
        .filter(|kind| record_for(records, *kind).is_some())
        .collect();

    let any_from_cache = records.iter().any(|r| r.from_cache);

    let assessment = assess(
        wind.as_ref().map(|w| &w.value),
        visibility_sm.as_ref().map(|v| v.value),
        ceiling_ft.as_ref().map(|c| c.value),
        precipitation_probability.as_ref().map(|p| p.value),
    );

    CompositeView {
        date,
        available: true,
        wind,
        temperature,
        ceiling_ft,
        visibility_sm,
        precipitation_probability,
        hours,
        sources,
        any_from_cache,
        assessment,
    }
}

fn format_sm(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Pure flyability assessment from independently thresholded conditions.
/// Worst triggered bucket wins; absent fields contribute nothing.
pub fn assess(
    wind: Option<&WindField>,
    visibility_sm: Option<f64>,
    ceiling_ft: Option<i32>,
    precipitation_probability: Option<i32>,
) -> FlightAssessment {
    let mut rating = FlightRating::Good;
    let mut reasons = Vec::new();

    if let Some(wind) = wind {
        if wind.speed_kt >= 20 {
            rating = rating.max(FlightRating::NoFly);
            reasons.push(format!("Wind too strong: {} kt", wind.speed_kt));
        } else if wind.speed_kt >= 15 {
            rating = rating.max(FlightRating::Poor);
            reasons.push(format!("High wind: {} kt", wind.speed_kt));
        } else if wind.speed_kt >= 10 {
            rating = rating.max(FlightRating::Marginal);
            reasons.push(format!("Moderate wind: {} kt", wind.speed_kt));
        }

        if let Some(gust) = wind.gust_kt {
            if gust >= 25 {
                rating = rating.max(FlightRating::NoFly);
                reasons.push(format!("Dangerous gusts: {} kt", gust));
            } else if gust >= 20 {
                rating = rating.max(FlightRating::Poor);
                reasons.push(format!("Strong gusts: {} kt", gust));
            } else if let Some(spread) = wind.gust_spread() {
                if spread >= 10 {
                    rating = rating.max(FlightRating::Marginal);
                    reasons.push(format!("Gusty: {} kt spread", spread));
                }
            }
        }
    }

    if let Some(vis) = visibility_sm {
        if vis < 1.0 {
            rating = rating.max(FlightRating::NoFly);
            reasons.push(format!("Very low visibility: {} SM", format_sm(vis)));
        } else if vis < 3.0 {
            rating = rating.max(FlightRating::Poor);
            reasons.push(format!("Reduced visibility: {} SM", format_sm(vis)));
        }
    }

    if let Some(ceiling) = ceiling_ft {
        if ceiling < 500 {
            rating = rating.max(FlightRating::Poor);
            reasons.push(format!("Very low ceiling: {} ft", ceiling));
        } else if ceiling < 1000 {
            rating = rating.max(FlightRating::Marginal);
            reasons.push(format!("Low ceiling: {} ft", ceiling));
        }
    }

    if let Some(precip) = precipitation_probability {
        if precip >= 25 {
            rating = rating.max(FlightRating::Poor);
            reasons.push(format!("High rain chance: {}%", precip));
        } else if precip >= 10 {
            rating = rating.max(FlightRating::Marginal);
            reasons.push(format!("Rain possible: {}%", precip));
        }
    }

    FlightAssessment { rating, reasons }
}
