//! Fetch orchestration: the tiered read path (fresh cache, live fetch,
//! stale fallback) plus the admin backfill fan-out. This is the only layer
//! that both reads and writes the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::{stream, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::db::{StoreError, WeatherReader, WeatherStore};
use crate::fetch::{FetchError, RetryPolicy, Transport};
use crate::merge::{merge, CompositeView};
use crate::models::{LocationKey, NormalizedRecord, ProviderKind};
use crate::providers::{
    extended::ExtendedProvider, historical::HistoricalProvider, hourly::HourlyProvider,
    metar::MetarProvider, nws::NwsProvider, taf::TafProvider, Provider, Site,
};
use crate::rate_limit::RateLimiter;
use crate::utils::{Cli, TtlConfig, UpstreamConfig};

/// Parallelism of the admin backfill fan-out.
const REFRESH_CONCURRENCY: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub struct WeatherService {
    store: Arc<dyn WeatherStore>,
    transport: Arc<dyn Transport>,
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    ttl: TtlConfig,
    site: Site,
    cooldown: time::Duration,
    /// Process-wide pause on the shared-quota family. Deliberately not
    /// persisted; a restart starts clean and the budget is recomputed from
    /// the store.
    rate_limited_until: Mutex<Option<OffsetDateTime>>,
}

impl WeatherService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn WeatherStore>,
        transport: Arc<dyn Transport>,
        providers: HashMap<ProviderKind, Arc<dyn Provider>>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        ttl: TtlConfig,
        site: Site,
        cooldown: time::Duration,
    ) -> Self {
        Self {
            store,
            transport,
            providers,
            limiter,
            policy,
            ttl,
            site,
            cooldown,
            rate_limited_until: Mutex::new(None),
        }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    fn cooldown_active(&self, now: OffsetDateTime) -> bool {
        self.rate_limited_until
            .lock()
            .map(|until| until.map(|u| u > now).unwrap_or(false))
            .unwrap_or(false)
    }

    fn open_cooldown(&self, now: OffsetDateTime) {
        if let Ok(mut state) = self.rate_limited_until.lock() {
            let until = now + self.cooldown;
            *state = Some(until);
            warn!("shared-quota providers paused until {}", until);
        }
    }

    /// Rate-limited fallback: serve whatever the cache holds, at any age.
    /// A miss still surfaces the refusal so callers can tell it apart from
    /// "provider has no data".
    async fn stale_or_rate_limited(
        &self,
        kind: ProviderKind,
        date: Date,
        key: &LocationKey,
    ) -> Result<Option<NormalizedRecord>, ServiceError> {
        match self.store.get(kind, date, key, None).await? {
            Some(stale) => Ok(Some(stale)),
            None => Err(FetchError::RateLimited { retry_after: None }.into()),
        }
    }

    /// Cache-first read: a fresh record short-circuits, otherwise fetch
    /// live, otherwise serve stale. Only a stale miss surfaces the failure.
    pub async fn get_or_fetch(
        &self,
        kind: ProviderKind,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, ServiceError> {
        let key = self.site.location_key(kind);
        let ttl = self.ttl.for_kind(kind);

        if let Some(hit) = self.store.get(kind, date, &key, Some(ttl)).await? {
            debug!("cache hit: {} {}", kind, date);
            return Ok(Some(hit));
        }

        self.fetch_and_store(kind, date).await
    }

    /// Live fetch ignoring cache freshness; still honors cooldown and the
    /// call budget, and still falls back to stale data on failure.
    pub async fn fetch_and_store(
        &self,
        kind: ProviderKind,
        date: Date,
    ) -> Result<Option<NormalizedRecord>, ServiceError> {
        let key = self.site.location_key(kind);
        let now = OffsetDateTime::now_utc();

        let Some(provider) = self.providers.get(&kind) else {
            // provider disabled (e.g. missing token); whatever is cached is
            // the best answer available
            return Ok(self.store.get(kind, date, &key, None).await?);
        };

        if kind.is_shared_quota() {
            if self.cooldown_active(now) {
                debug!("{} fetch skipped: shared-quota cooldown active", kind);
                return self.stale_or_rate_limited(kind, date, &key).await;
            }

            let check = self.limiter.check(self.store.as_ref(), now).await?;
            if let Some(window) = check.exhausted {
                warn!(
                    "{} fetch refused: {} budget spent ({}/min {}/hr {}/day)",
                    kind, window, check.minute, check.hour, check.day
                );
                // a proactive refusal pauses the whole family too, so the
                // poller stops re-running the count queries every tick
                self.open_cooldown(now);
                return self.stale_or_rate_limited(kind, date, &key).await;
            }
        }

        let started = std::time::Instant::now();
        match provider.fetch(self.transport.as_ref(), &self.policy, date).await {
            Ok(Some(record)) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                // a persistence failure never overrides the fetched answer
                if let Err(e) = self.store.put(&record, &key, Some(elapsed_ms)).await {
                    error!("failed to persist {} record for {}: {}", kind, date, e);
                }
                Ok(Some(record))
            }
            Ok(None) => {
                debug!("{} has no data for {}", kind, date);
                Ok(None)
            }
            Err(err) => {
                if matches!(err, FetchError::RateLimited { .. }) && kind.is_shared_quota() {
                    self.open_cooldown(OffsetDateTime::now_utc());
                }
                match self.store.get(kind, date, &key, None).await? {
                    Some(stale) => {
                        warn!("serving stale {} data for {} after fetch failure: {}", kind, date, err);
                        Ok(Some(stale))
                    }
                    None => Err(err.into()),
                }
            }
        }
    }

    /// Operator backfill: live-fetch the given families over a date range
    /// with bounded concurrency, reporting per-pair outcomes.
    pub async fn refresh(
        &self,
        kinds: Vec<ProviderKind>,
        dates: Vec<Date>,
    ) -> Vec<RefreshOutcome> {
        let pairs: Vec<(ProviderKind, Date)> = kinds
            .iter()
            .flat_map(|kind| dates.iter().map(move |date| (*kind, *date)))
            .collect();

        let mut outcomes: Vec<RefreshOutcome> = stream::iter(pairs)
            .map(|(kind, date)| async move {
                let status = match self.fetch_and_store(kind, date).await {
                    Ok(Some(_)) => RefreshStatus::Fetched,
                    Ok(None) => RefreshStatus::NoData,
                    Err(e) => RefreshStatus::Failed(e.to_string()),
                };
                RefreshOutcome { kind, date, status }
            })
            .buffer_unordered(REFRESH_CONCURRENCY)
            .collect()
            .await;

        outcomes.sort_by_key(|o| (o.kind, o.date));
        info!(
            "refresh complete: {} fetched, {} empty, {} failed",
            outcomes.iter().filter(|o| o.status == RefreshStatus::Fetched).count(),
            outcomes.iter().filter(|o| o.status == RefreshStatus::NoData).count(),
            outcomes
                .iter()
                .filter(|o| matches!(o.status, RefreshStatus::Failed(_)))
                .count()
        );
        outcomes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Fetched,
    NoData,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub kind: ProviderKind,
    pub date: Date,
    pub status: RefreshStatus,
}

/// Database-only composite for one date: collect whatever records exist for
/// every family and merge. Never triggers a fetch; this is the reader path.
pub async fn read_composite(
    reader: &dyn WeatherReader,
    site: &Site,
    date: Date,
) -> Result<CompositeView, StoreError> {
    let mut records = Vec::new();
    for kind in ProviderKind::ALL {
        let key = site.location_key(kind);
        if let Some(record) = reader.get(kind, date, &key, None).await? {
            records.push(record);
        }
    }
    Ok(merge(date, &records))
}

/// Wire up one provider per family from configuration. A missing AVWX token
/// disables METAR/TAF only; the rest of the families are unaffected.
pub fn build_providers(
    cli: &Cli,
    upstream: &UpstreamConfig,
    site: &Site,
) -> HashMap<ProviderKind, Arc<dyn Provider>> {
    let mut providers: HashMap<ProviderKind, Arc<dyn Provider>> = HashMap::new();

    match &cli.avwx_token {
        Some(token) => {
            providers.insert(
                ProviderKind::Metar,
                Arc::new(MetarProvider::new(&upstream.avwx_base_url, token, site)),
            );
            providers.insert(
                ProviderKind::Taf,
                Arc::new(TafProvider::new(&upstream.avwx_base_url, token, site)),
            );
        }
        None => warn!("no AVWX token configured; METAR and TAF providers disabled"),
    }

    providers.insert(
        ProviderKind::Nws,
        Arc::new(NwsProvider::new(
            &upstream.nws_base_url,
            site,
            cli.nws_forecast_url.clone(),
        )),
    );
    providers.insert(
        ProviderKind::Extended,
        Arc::new(ExtendedProvider::new(&upstream.open_meteo_base_url, site)),
    );
    providers.insert(
        ProviderKind::Hourly,
        Arc::new(HourlyProvider::new(&upstream.open_meteo_base_url, site)),
    );
    providers.insert(
        ProviderKind::Historical,
        Arc::new(HistoricalProvider::new(&upstream.open_meteo_archive_url, site)),
    );

    providers
}
