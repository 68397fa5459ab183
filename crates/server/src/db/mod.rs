pub mod store;

use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use crate::models::{LocationKey, NormalizedRecord, ProviderKind};

pub use store::SqliteStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid timestamp in row {id}: {source}")]
    Timestamp {
        id: i64,
        source: time::error::Parse,
    },
    #[error("timestamp format error: {0}")]
    Format(#[from] time::error::Format),
    #[error("database writer channel closed")]
    WriterClosed,
}

/// Read-only view of the durable cache-of-record. This is the only
/// capability request handlers receive; nothing reachable from a read path
/// can trigger an upstream fetch or a write.
#[async_trait]
pub trait WeatherReader: Send + Sync {
    /// Latest persisted record for a provider, date and location, stamped
    /// `from_cache` with the stored fetch time.
    ///
    /// `max_age` bounds how old a row may be to count as a hit; `None`
    /// accepts any age (the stale-fallback read). The store itself holds no
    /// TTL policy.
    async fn get(
        &self,
        kind: ProviderKind,
        date: Date,
        location: &LocationKey,
        max_age: Option<time::Duration>,
    ) -> Result<Option<NormalizedRecord>, StoreError>;
}

/// Full store surface; held by the fetch service, the poller and the
/// retention job. Everything that writes goes through here.
#[async_trait]
pub trait WeatherStore: WeatherReader {
    /// Upsert: replaces any existing row for the same (provider, date,
    /// location) key so the table holds one current row per key.
    async fn put(
        &self,
        record: &NormalizedRecord,
        location: &LocationKey,
        fetch_duration_ms: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Fetches recorded for the shared-quota provider family since `cutoff`.
    /// The rate budget is computed from these counts.
    async fn count_shared_quota_since(&self, cutoff: OffsetDateTime) -> Result<i64, StoreError>;

    /// Drop the row for one (provider, date, location) key; returns rows
    /// deleted (0 or 1 given the upsert invariant).
    async fn delete(
        &self,
        kind: ProviderKind,
        date: Date,
        location: &LocationKey,
    ) -> Result<u64, StoreError>;

    /// Retention sweep; returns rows deleted.
    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<u64, StoreError>;

    /// Drop cached rows, optionally for one provider only; returns rows
    /// deleted. Clearing also forgets the fetch history the rate budget
    /// counts against.
    async fn clear(&self, kind: Option<ProviderKind>) -> Result<u64, StoreError>;
}
