//! Proactive call-budget enforcement for the shared-quota provider family.
//!
//! Counts are derived from persisted fetch timestamps rather than an
//! in-memory token bucket, so restarts never forget how much budget was
//! already spent.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::db::{StoreError, WeatherStore};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBudget {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
    /// Fraction of each ceiling actually spent before refusing.
    pub margin: f64,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            per_minute: 600,
            per_hour: 5000,
            per_day: 10000,
            margin: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWindow {
    Minute,
    Hour,
    Day,
}

impl std::fmt::Display for QuotaWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuotaWindow::Minute => "minute",
            QuotaWindow::Hour => "hour",
            QuotaWindow::Day => "day",
        };
        f.write_str(s)
    }
}

/// Outcome of one budget check; counts are kept for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaCheck {
    pub minute: i64,
    pub hour: i64,
    pub day: i64,
    /// First window at or over its margin, if any. `None` means allowed.
    pub exhausted: Option<QuotaWindow>,
}

impl QuotaCheck {
    pub fn allowed(&self) -> bool {
        self.exhausted.is_none()
    }
}

/// A window refuses once spend reaches `ceiling * margin`; at the boundary
/// the call is refused, never allowed.
fn exceeds(count: i64, ceiling: u32, margin: f64) -> bool {
    count as f64 >= f64::from(ceiling) * margin
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    budget: RateBudget,
}

impl RateLimiter {
    pub fn new(budget: RateBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &RateBudget {
        &self.budget
    }

    /// Check all three windows against the persisted fetch history. Any
    /// exhausted window refuses the call.
    pub async fn check(
        &self,
        store: &dyn WeatherStore,
        now: OffsetDateTime,
    ) -> Result<QuotaCheck, StoreError> {
        let minute = store.count_shared_quota_since(now - Duration::minutes(1)).await?;
        let hour = store.count_shared_quota_since(now - Duration::hours(1)).await?;
        let day = store.count_shared_quota_since(now - Duration::days(1)).await?;

        let b = &self.budget;
        let exhausted = if exceeds(minute, b.per_minute, b.margin) {
            Some(QuotaWindow::Minute)
        } else if exceeds(hour, b.per_hour, b.margin) {
            Some(QuotaWindow::Hour)
        } else if exceeds(day, b.per_day, b.margin) {
            Some(QuotaWindow::Day)
        } else {
            None
        };

        Ok(QuotaCheck {
            minute,
            hour,
            day,
            exhausted,
        })
    }
}
