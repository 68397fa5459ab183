use std::{future::Future, path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime, UtcOffset};
use tokio::{
    fs::create_dir_all,
    sync::{mpsc, oneshot},
};

use super::{StoreError, WeatherReader, WeatherStore};
use crate::models::{LocationKey, NormalizedRecord, ProviderKind};

const DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]");

/// RFC 3339 in UTC, truncated to whole seconds so stored strings compare
/// lexicographically in SQL.
fn format_ts(t: OffsetDateTime) -> Result<String, StoreError> {
    let t = t.to_offset(UtcOffset::UTC);
    let t = t.replace_nanosecond(0).unwrap_or(t);
    Ok(t.format(&Rfc3339)?)
}

fn format_date(d: Date) -> Result<String, StoreError> {
    Ok(d.format(&DATE_FORMAT)?)
}

type WriteOperation = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serializes all writes through a single task, so concurrent fetchers never
/// contend on the SQLite write lock.
struct DatabaseWriter {
    write_tx: mpsc::UnboundedSender<WriteOperation>,
    _handle: tokio::task::JoinHandle<()>,
}

impl DatabaseWriter {
    fn new() -> Self {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteOperation>();

        let handle = tokio::spawn(async move {
            while let Some(future) = write_rx.recv().await {
                future.await;
            }
        });

        Self {
            write_tx,
            _handle: handle,
        }
    }

    async fn execute<T, F, Fut>(&self, pool: SqlitePool, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T, StoreError>>();

        let write_op = Box::pin(async move {
            let result = operation(pool).await;
            let _ = result_tx.send(result);
        });

        self.write_tx
            .send(write_op)
            .map_err(|_| StoreError::WriterClosed)?;

        result_rx.await.map_err(|_| StoreError::WriterClosed)?
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    writer: DatabaseWriter,
}

impl SqliteStore {
    pub async fn new(data_dir: &str) -> Result<Self, StoreError> {
        let db_path = format!("{}/weather.sqlite", data_dir);

        if let Some(parent) = Path::new(&db_path).parent() {
            create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Sqlx(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "5000")
            .pragma("cache_size", "-64000")
            .pragma("foreign_keys", "ON")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            writer: DatabaseWriter::new(),
        };

        store.run_migrations().await?;
        info!("SQLite store initialized at: {}", db_path);

        Ok(store)
    }

    /// In-memory store for tests; a single connection keeps the database
    /// alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            writer: DatabaseWriter::new(),
        };

        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connectivity plus page-structure integrity, surfaced by the health
    /// endpoint.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;

        let result: String = sqlx::query_scalar("PRAGMA quick_check;")
            .fetch_one(&self.pool)
            .await?;
        if result != "ok" {
            return Err(StoreError::Sqlx(sqlx::Error::Protocol(format!(
                "integrity check failed: {}",
                result
            ))));
        }

        Ok(())
    }

    /// Checkpoint WAL into the main file before shutdown so the on-disk
    /// database is complete without the sidecar files.
    pub async fn checkpoint(&self) {
        match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
        {
            Ok(_) => info!("WAL checkpoint completed"),
            Err(e) => log::error!("WAL checkpoint failed: {}", e),
        }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<NormalizedRecord, StoreError> {
        let id: i64 = row.get("id");
        let data: String = row.get("data");
        let fetched_at_raw: String = row.get("fetched_at");

        let record: NormalizedRecord = serde_json::from_str(&data)?;
        let fetched_at = OffsetDateTime::parse(&fetched_at_raw, &Rfc3339)
            .map_err(|source| StoreError::Timestamp { id, source })?;

        Ok(record.into_cached(fetched_at))
    }
}

/// Lexicographically smallest RFC 3339 string; matches every row.
const EPOCH_TS: &str = "0001-01-01T00:00:00Z";

#[async_trait]
impl WeatherReader for SqliteStore {
    async fn get(
        &self,
        kind: ProviderKind,
        date: Date,
        location: &LocationKey,
        max_age: Option<time::Duration>,
    ) -> Result<Option<NormalizedRecord>, StoreError> {
        let date_str = format_date(date)?;
        let cutoff = match max_age {
            Some(age) => format_ts(OffsetDateTime::now_utc() - age)?,
            None => EPOCH_TS.to_string(),
        };

        let row = match location {
            LocationKey::Station(station) => {
                sqlx::query(
                    "SELECT id, data, fetched_at FROM weather_records
                     WHERE provider = ? AND target_date = ? AND station = ?
                       AND fetched_at >= ?
                     ORDER BY fetched_at DESC LIMIT 1",
                )
                .bind(kind.as_str())
                .bind(&date_str)
                .bind(station)
                .bind(&cutoff)
                .fetch_optional(&self.pool)
                .await?
            }
            LocationKey::Coords { lat, lon } => {
                sqlx::query(
                    "SELECT id, data, fetched_at FROM weather_records
                     WHERE provider = ? AND target_date = ? AND station = ''
                       AND latitude IS NOT NULL AND ABS(latitude - ?) < ?
                       AND longitude IS NOT NULL AND ABS(longitude - ?) < ?
                       AND fetched_at >= ?
                     ORDER BY fetched_at DESC LIMIT 1",
                )
                .bind(kind.as_str())
                .bind(&date_str)
                .bind(lat)
                .bind(LocationKey::COORD_TOLERANCE)
                .bind(lon)
                .bind(LocationKey::COORD_TOLERANCE)
                .bind(&cutoff)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.as_ref().map(Self::row_to_record).transpose()
    }
}

#[async_trait]
impl WeatherStore for SqliteStore {
    async fn put(
        &self,
        record: &NormalizedRecord,
        location: &LocationKey,
        fetch_duration_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let provider = record.kind.as_str();
        let date_str = format_date(record.target_date)?;
        let data = serde_json::to_string(record)?;
        let fetched_at = format_ts(record.fetched_at)?;

        let (station, lat, lon) = match location {
            LocationKey::Station(s) => (s.clone(), None, None),
            LocationKey::Coords { lat, lon } => (String::new(), Some(*lat), Some(*lon)),
        };

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;

                let existing: Option<(i64,)> = match (lat, lon) {
                    (Some(lat), Some(lon)) => {
                        sqlx::query_as(
                            "SELECT id FROM weather_records
                             WHERE provider = ? AND target_date = ? AND station = ''
                               AND latitude IS NOT NULL AND ABS(latitude - ?) < ?
                               AND longitude IS NOT NULL AND ABS(longitude - ?) < ?
                             LIMIT 1",
                        )
                        .bind(provider)
                        .bind(&date_str)
                        .bind(lat)
                        .bind(LocationKey::COORD_TOLERANCE)
                        .bind(lon)
                        .bind(LocationKey::COORD_TOLERANCE)
                        .fetch_optional(&mut *tx)
                        .await?
                    }
                    _ => {
                        sqlx::query_as(
                            "SELECT id FROM weather_records
                             WHERE provider = ? AND target_date = ? AND station = ?
                             LIMIT 1",
                        )
                        .bind(provider)
                        .bind(&date_str)
                        .bind(&station)
                        .fetch_optional(&mut *tx)
                        .await?
                    }
                };

                match existing {
                    Some((id,)) => {
                        sqlx::query(
                            "UPDATE weather_records
                             SET data = ?, fetched_at = ?, fetch_duration_ms = ?
                             WHERE id = ?",
                        )
                        .bind(&data)
                        .bind(&fetched_at)
                        .bind(fetch_duration_ms)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    }
                    None => {
                        sqlx::query(
                            "INSERT INTO weather_records
                             (provider, target_date, station, latitude, longitude,
                              data, fetched_at, fetch_duration_ms)
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        )
                        .bind(provider)
                        .bind(&date_str)
                        .bind(&station)
                        .bind(lat)
                        .bind(lon)
                        .bind(&data)
                        .bind(&fetched_at)
                        .bind(fetch_duration_ms)
                        .execute(&mut *tx)
                        .await?;
                    }
                }

                tx.commit().await?;
                Ok(())
            })
            .await
    }

    async fn count_shared_quota_since(&self, cutoff: OffsetDateTime) -> Result<i64, StoreError> {
        let cutoff = format_ts(cutoff)?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM weather_records
             WHERE provider IN ('extended', 'hourly', 'historical')
               AND fetched_at >= ?",
        )
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn delete(
        &self,
        kind: ProviderKind,
        date: Date,
        location: &LocationKey,
    ) -> Result<u64, StoreError> {
        let pool = self.pool.clone();
        let provider = kind.as_str();
        let date_str = format_date(date)?;
        let location = location.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let result = match &location {
                    LocationKey::Station(station) => {
                        sqlx::query(
                            "DELETE FROM weather_records
                             WHERE provider = ? AND target_date = ? AND station = ?",
                        )
                        .bind(provider)
                        .bind(&date_str)
                        .bind(station)
                        .execute(&pool)
                        .await?
                    }
                    LocationKey::Coords { lat, lon } => {
                        sqlx::query(
                            "DELETE FROM weather_records
                             WHERE provider = ? AND target_date = ? AND station = ''
                               AND latitude IS NOT NULL AND ABS(latitude - ?) < ?
                               AND longitude IS NOT NULL AND ABS(longitude - ?) < ?",
                        )
                        .bind(provider)
                        .bind(&date_str)
                        .bind(lat)
                        .bind(LocationKey::COORD_TOLERANCE)
                        .bind(lon)
                        .bind(LocationKey::COORD_TOLERANCE)
                        .execute(&pool)
                        .await?
                    }
                };
                Ok(result.rows_affected())
            })
            .await
    }

    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<u64, StoreError> {
        let pool = self.pool.clone();
        let cutoff = format_ts(cutoff)?;

        self.writer
            .execute(pool, move |pool| async move {
                let result = sqlx::query("DELETE FROM weather_records WHERE fetched_at < ?")
                    .bind(&cutoff)
                    .execute(&pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await
    }

    async fn clear(&self, kind: Option<ProviderKind>) -> Result<u64, StoreError> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let result = match kind {
                    Some(kind) => {
                        sqlx::query("DELETE FROM weather_records WHERE provider = ?")
                            .bind(kind.as_str())
                            .execute(&pool)
                            .await?
                    }
                    None => {
                        sqlx::query("DELETE FROM weather_records")
                            .execute(&pool)
                            .await?
                    }
                };
                Ok(result.rows_affected())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn sample(kind: ProviderKind, date: Date) -> NormalizedRecord {
        let mut record = NormalizedRecord::new(kind, date);
        record.temperature_high_c = Some(21);
        record
    }

    async fn backdate_all(store: &SqliteStore, to: OffsetDateTime) {
        let ts = format_ts(to).unwrap();
        sqlx::query("UPDATE weather_records SET fetched_at = ?")
            .bind(&ts)
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_and_marks_cache() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d = date!(2024 - 08 - 12);
        let key = LocationKey::Station("KPDX".into());

        let record = sample(ProviderKind::Metar, d);
        store.put(&record, &key, Some(120)).await.unwrap();

        let got = store.get(ProviderKind::Metar, d, &key, None).await.unwrap().unwrap();
        assert_eq!(got.temperature_high_c, Some(21));
        assert!(got.from_cache);

        // different station misses
        let other = LocationKey::Station("KSEA".into());
        assert!(store.get(ProviderKind::Metar, d, &other, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn max_age_bounds_hits_but_not_stale_reads() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d = date!(2024 - 08 - 12);
        let key = LocationKey::Station("KPDX".into());

        store.put(&sample(ProviderKind::Metar, d), &key, None).await.unwrap();
        backdate_all(&store, OffsetDateTime::now_utc() - time::Duration::hours(5)).await;

        // past the TTL it is a miss, but an unbounded read still sees it
        let fresh = store
            .get(ProviderKind::Metar, d, &key, Some(time::Duration::hours(4)))
            .await
            .unwrap();
        assert!(fresh.is_none());

        let any_age = store.get(ProviderKind::Metar, d, &key, None).await.unwrap();
        assert!(any_age.is_some());

        let lenient = store
            .get(ProviderKind::Metar, d, &key, Some(time::Duration::hours(6)))
            .await
            .unwrap();
        assert!(lenient.is_some());
    }

    #[tokio::test]
    async fn put_upserts_in_place() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d = date!(2024 - 08 - 12);
        let key = LocationKey::Station("KPDX".into());

        store.put(&sample(ProviderKind::Metar, d), &key, None).await.unwrap();
        let mut updated = sample(ProviderKind::Metar, d);
        updated.temperature_high_c = Some(30);
        store.put(&updated, &key, None).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM weather_records")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let got = store.get(ProviderKind::Metar, d, &key, None).await.unwrap().unwrap();
        assert_eq!(got.temperature_high_c, Some(30));
    }

    #[tokio::test]
    async fn coordinate_lookup_tolerates_float_drift() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d = date!(2024 - 08 - 12);
        let written = LocationKey::Coords {
            lat: 45.5886,
            lon: -122.5975,
        };
        store.put(&sample(ProviderKind::Extended, d), &written, None).await.unwrap();

        let nearby = LocationKey::Coords {
            lat: 45.58863,
            lon: -122.59747,
        };
        assert!(store.get(ProviderKind::Extended, d, &nearby, None).await.unwrap().is_some());

        let far = LocationKey::Coords {
            lat: 45.59,
            lon: -122.5975,
        };
        assert!(store.get(ProviderKind::Extended, d, &far, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_quota_count_ignores_station_providers() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d = date!(2024 - 08 - 12);
        let coords = LocationKey::Coords { lat: 45.0, lon: -122.0 };

        store.put(&sample(ProviderKind::Extended, d), &coords, None).await.unwrap();
        store.put(&sample(ProviderKind::Hourly, d), &coords, None).await.unwrap();
        store
            .put(
                &sample(ProviderKind::Metar, d),
                &LocationKey::Station("KPDX".into()),
                None,
            )
            .await
            .unwrap();

        let cutoff = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        assert_eq!(store.count_shared_quota_since(cutoff).await.unwrap(), 2);

        // records fetched before the cutoff no longer count
        backdate_all(&store, datetime!(2024-01-01 00:00:00 UTC)).await;
        assert_eq!(store.count_shared_quota_since(cutoff).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_removes_exactly_one_key() {
        let store = SqliteStore::in_memory().await.unwrap();
        let key = LocationKey::Station("KPDX".into());

        store
            .put(&sample(ProviderKind::Metar, date!(2024 - 08 - 12)), &key, None)
            .await
            .unwrap();
        store
            .put(&sample(ProviderKind::Metar, date!(2024 - 08 - 13)), &key, None)
            .await
            .unwrap();

        // wrong station leaves everything alone
        let other = LocationKey::Station("KSEA".into());
        assert_eq!(
            store.delete(ProviderKind::Metar, date!(2024 - 08 - 12), &other).await.unwrap(),
            0
        );

        assert_eq!(
            store.delete(ProviderKind::Metar, date!(2024 - 08 - 12), &key).await.unwrap(),
            1
        );
        assert!(store
            .get(ProviderKind::Metar, date!(2024 - 08 - 12), &key, None)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get(ProviderKind::Metar, date!(2024 - 08 - 13), &key, None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn purge_deletes_only_old_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        let coords = LocationKey::Coords { lat: 45.0, lon: -122.0 };

        store
            .put(&sample(ProviderKind::Extended, date!(2024 - 01 - 01)), &coords, None)
            .await
            .unwrap();
        backdate_all(&store, datetime!(2024-01-01 00:00:00 UTC)).await;
        store
            .put(&sample(ProviderKind::Extended, date!(2024 - 08 - 12)), &coords, None)
            .await
            .unwrap();

        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(30);
        let deleted = store.purge_older_than(cutoff).await.unwrap();
        assert_eq!(deleted, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM weather_records")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn clear_scopes_to_provider_when_given() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d = date!(2024 - 08 - 12);
        let coords = LocationKey::Coords { lat: 45.0, lon: -122.0 };
        let station = LocationKey::Station("KPDX".into());

        store.put(&sample(ProviderKind::Extended, d), &coords, None).await.unwrap();
        store.put(&sample(ProviderKind::Metar, d), &station, None).await.unwrap();

        assert_eq!(store.clear(Some(ProviderKind::Extended)).await.unwrap(), 1);
        assert!(store.get(ProviderKind::Metar, d, &station, None).await.unwrap().is_some());

        assert_eq!(store.clear(None).await.unwrap(), 1);
    }
}
