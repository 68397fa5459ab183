//! Background polling loop: sweeps every forward-looking provider family on
//! a fixed tick, refreshing whatever the cache TTLs say is due, and runs the
//! daily retention sweep.

use std::sync::Arc;

use log::{error, info, warn};
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;

use crate::db::WeatherStore;
use crate::models::ProviderKind;
use crate::service::WeatherService;
use crate::utils::{PollConfig, RetentionConfig};

pub struct Poller {
    service: Arc<WeatherService>,
    store: Arc<dyn WeatherStore>,
    poll: PollConfig,
    retention: RetentionConfig,
}

/// Dates a family is responsible for on a given day, oldest first.
fn sweep_dates(kind: ProviderKind, today: Date) -> Vec<Date> {
    match kind.poll_window() {
        Some(window) => window.map(|days_out| today + Duration::days(days_out)).collect(),
        None => Vec::new(),
    }
}

/// The retention sweep runs once per local day, at or after the configured
/// hour.
fn cleanup_due(now_local: OffsetDateTime, cleanup_hour: u8, last_run: Option<Date>) -> bool {
    if now_local.hour() < cleanup_hour {
        return false;
    }
    last_run != Some(now_local.date())
}

impl Poller {
    pub fn new(
        service: Arc<WeatherService>,
        store: Arc<dyn WeatherStore>,
        poll: PollConfig,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            service,
            store,
            poll,
            retention,
        }
    }

    fn local_offset(&self) -> UtcOffset {
        UtcOffset::from_hms(self.retention.utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }

    fn now_local(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.local_offset())
    }

    /// One pass over every pollable family. TTL freshness is checked inside
    /// `get_or_fetch`, so an up-to-date family costs one indexed read.
    /// Failures are isolated per (family, date).
    async fn sweep(&self) {
        let today = self.now_local().date();

        for kind in ProviderKind::ALL {
            if kind.poll_window().is_none() || !self.service.has_provider(kind) {
                continue;
            }
            for date in sweep_dates(kind, today) {
                if let Err(e) = self.service.get_or_fetch(kind, date).await {
                    warn!("poll failed for {} {}: {}", kind, date, e);
                }
            }
        }
    }

    async fn maybe_cleanup(&self, last_run: &mut Option<Date>) {
        let now_local = self.now_local();
        if !cleanup_due(now_local, self.retention.cleanup_hour, *last_run) {
            return;
        }

        let cutoff = OffsetDateTime::now_utc() - Duration::days(self.retention.cleanup_days);
        match self.store.purge_older_than(cutoff).await {
            Ok(deleted) => {
                info!(
                    "retention sweep removed {} records older than {} days",
                    deleted, self.retention.cleanup_days
                );
                *last_run = Some(now_local.date());
            }
            Err(e) => error!("retention sweep failed: {}", e),
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let startup = std::time::Duration::from_secs(self.poll.startup_delay_secs);
        info!(
            "poller starting in {:?}, tick every {}s",
            startup, self.poll.tick_secs
        );

        tokio::select! {
            _ = token.cancelled() => {
                info!("poller cancelled before first sweep");
                return;
            }
            _ = tokio::time::sleep(startup) => {}
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.poll.tick_secs));
        let mut last_cleanup: Option<Date> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("poller shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                    self.maybe_cleanup(&mut last_cleanup).await;
                }
            }
        }
    }
}
