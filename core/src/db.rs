use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::models::DataKind;
use crate::record::Record;

const SETTINGS_TABLE: &str = "settings";

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Local record store: one keyed partition per [`DataKind`] plus an untyped
/// settings partition, on a single `SQLite` connection.
///
/// The connection is opened lazily by [`LocalStore::open_if_needed`]; every
/// other operation fails with [`SyncError::NotInitialized`] until then.
pub struct LocalStore {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl LocalStore {
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            location: Location::File(path.to_path_buf()),
            conn: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Open the backing database and create missing partitions. Safe to call
    /// repeatedly and concurrently; only the first call opens.
    pub async fn open_if_needed(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let conn = match &self.location {
            Location::File(path) => Connection::open(path).map_err(|e| {
                SyncError::StorageFailure(format!(
                    "failed to open database {}: {e}",
                    path.display()
                ))
            })?,
            Location::Memory => Connection::open_in_memory()?,
        };
        migrate(&conn)?;
        info!(location = ?self.location, "local store opened");
        *guard = Some(conn);
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    async fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(SyncError::NotInitialized)?;
        f(conn)
    }

    // --- Typed partitions ---

    pub async fn put<R: Record>(&self, key: &str, record: &R) -> Result<()> {
        let bytes = record.encode()?;
        let table = R::KIND.partition();
        debug!(%table, %key, len = bytes.len(), "put");
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                ),
                params![key, bytes],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
        let table = R::KIND.partition();
        let bytes: Option<Vec<u8>> = self
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT value FROM {table} WHERE key = ?1"),
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match bytes {
            Some(b) => Ok(Some(R::decode(&b)?)),
            None => Ok(None),
        }
    }

    /// Every record of one kind, in key order.
    pub async fn scan<R: Record>(&self) -> Result<Vec<R>> {
        let table = R::KIND.partition();
        let blobs: Vec<Vec<u8>> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!("SELECT value FROM {table} ORDER BY key"))?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        debug!(%table, count = blobs.len(), "scan");
        blobs
            .iter()
            .map(|b| R::decode(b).map_err(SyncError::from))
            .collect()
    }

    pub async fn delete(&self, kind: DataKind, key: &str) -> Result<bool> {
        let table = kind.partition();
        debug!(%table, %key, "delete");
        self.with_conn(|conn| {
            let rows = conn.execute(
                &format!("DELETE FROM {table} WHERE key = ?1"),
                params![key],
            )?;
            Ok(rows > 0)
        })
        .await
    }

    /// Wipe a whole partition. Returns the number of records removed.
    pub async fn clear(&self, kind: DataKind) -> Result<usize> {
        let table = kind.partition();
        let removed = self
            .with_conn(|conn| Ok(conn.execute(&format!("DELETE FROM {table}"), [])?))
            .await?;
        info!(%table, removed, "partition cleared");
        Ok(removed)
    }

    pub async fn count(&self, kind: DataKind) -> Result<usize> {
        let table = kind.partition();
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
        .await
    }

    // --- Settings ---

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {SETTINGS_TABLE} (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                ),
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT value FROM {SETTINGS_TABLE} WHERE key = ?1"),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                &format!("DELETE FROM {SETTINGS_TABLE} WHERE key = ?1"),
                params![key],
            )?;
            Ok(rows > 0)
        })
        .await
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        let mut batch = String::new();
        for kind in DataKind::ALL {
            let table = kind.partition();
            batch.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    key TEXT PRIMARY KEY NOT NULL,
                    value BLOB NOT NULL
                );\n"
            ));
        }
        batch.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {SETTINGS_TABLE} (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );

            PRAGMA user_version = 1;"
        ));
        conn.execute_batch(&batch)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::models::{
        DailyHealthRecord, MealItem, MealRecord, MealType, NutritionInfo, StepSnapshot,
        composite_key,
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn health(user: &str, d: u32) -> DailyHealthRecord {
        let now = Utc.with_ymd_and_hms(2024, 6, d, 12, 0, 0).unwrap();
        let mut r = DailyHealthRecord::new(user, day(d), now);
        r.steps = 1000 * i64::from(d);
        r
    }

    async fn open_store() -> LocalStore {
        let store = LocalStore::in_memory();
        store.open_if_needed().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_operations_before_open_fail() {
        let store = LocalStore::in_memory();
        let r = health("u1", 1);

        assert!(matches!(
            store.put(&r.key(), &r).await,
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            store.get::<DailyHealthRecord>("x").await,
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            store.scan::<DailyHealthRecord>().await,
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            store.clear(DataKind::Health).await,
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            store.get_setting("k").await,
            Err(SyncError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_keeps_data() {
        let store = open_store().await;
        let r = health("u1", 1);
        store.put(&r.key(), &r).await.unwrap();

        store.open_if_needed().await.unwrap();
        assert!(store.is_open().await);
        assert_eq!(store.get::<DailyHealthRecord>(&r.key()).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn test_concurrent_open() {
        let store = Arc::new(LocalStore::in_memory());
        let (a, b, c) = tokio::join!(
            store.open_if_needed(),
            store.open_if_needed(),
            store.open_if_needed()
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        let r = health("u1", 2);
        store.put(&r.key(), &r).await.unwrap();
        assert_eq!(store.count(DataKind::Health).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = open_store().await;
        let mut r = health("u1", 3);
        store.put(&r.key(), &r).await.unwrap();
        r.steps = 42;
        store.put(&r.key(), &r).await.unwrap();

        let all = store.scan::<DailyHealthRecord>().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].steps, 42);
    }

    #[tokio::test]
    async fn test_put_get_meal_with_items() {
        let store = open_store().await;
        let logged = Utc.with_ymd_and_hms(2024, 6, 15, 7, 45, 0).unwrap();
        let mut meal = MealRecord::new("u1", MealType::Breakfast, logged);
        meal.items.push(MealItem::manual(
            "Greek yogurt",
            NutritionInfo {
                calories: 100.0,
                protein: 17.0,
                ..NutritionInfo::default()
            },
            2.0,
        ));
        meal.items.push(MealItem::manual(
            "Honey",
            NutritionInfo {
                calories: 64.0,
                sugar: 17.0,
                ..NutritionInfo::default()
            },
            0.5,
        ));
        store.put(&meal.id, &meal).await.unwrap();

        let fetched: MealRecord = store.get(&meal.id).await.unwrap().unwrap();
        assert_eq!(fetched, meal);
        assert_eq!(fetched.items[1].food_name, "Honey");
    }

    #[tokio::test]
    async fn test_partitions_are_separate() {
        let store = open_store().await;
        let r = health("u1", 4);
        store.put(&r.key(), &r).await.unwrap();

        assert!(store.get::<StepSnapshot>(&r.key()).await.unwrap().is_none());
        assert!(store.scan::<StepSnapshot>().await.unwrap().is_empty());
        assert!(!store.delete(DataKind::Steps, &r.key()).await.unwrap());
        assert!(store.delete(DataKind::Health, &r.key()).await.unwrap());
        assert!(store.get::<DailyHealthRecord>(&r.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_partition() {
        let store = open_store().await;
        for d in 1..=3 {
            let r = health("u1", d);
            store.put(&r.key(), &r).await.unwrap();
        }
        let s = StepSnapshot::new("u1", day(1), Utc::now());
        store.put(&s.key(), &s).await.unwrap();

        assert_eq!(store.clear(DataKind::Health).await.unwrap(), 3);
        assert!(store.scan::<DailyHealthRecord>().await.unwrap().is_empty());
        assert_eq!(store.count(DataKind::Steps).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_storage_failure() {
        let store = open_store().await;
        let key = composite_key("u1", day(5));
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO health_data (key, value) VALUES (?1, ?2)",
                    params![key, vec![1u8, 3]],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(
            store.get::<DailyHealthRecord>(&key).await,
            Err(SyncError::StorageFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_settings() {
        let store = open_store().await;
        assert!(store.get_setting("u1:height_cm").await.unwrap().is_none());

        store.set_setting("u1:height_cm", "180").await.unwrap();
        store.set_setting("u1:height_cm", "181").await.unwrap();
        store.set_setting("u1:weight_kg", "80").await.unwrap();
        store.set_setting("u10:weight_kg", "55").await.unwrap();
        assert_eq!(
            store.get_setting("u1:height_cm").await.unwrap().as_deref(),
            Some("181")
        );

        assert!(store.delete_setting("u1:weight_kg").await.unwrap());
        assert!(store.get_setting("u1:weight_kg").await.unwrap().is_none());
        assert!(store.get_setting("u10:weight_kg").await.unwrap().is_some());
        assert!(store.delete_setting("u10:weight_kg").await.unwrap());
        assert!(!store.delete_setting("u10:weight_kg").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daybook.db");
        let r = health("u1", 6);
        {
            let store = LocalStore::new(&path);
            store.open_if_needed().await.unwrap();
            store.put(&r.key(), &r).await.unwrap();
        }
        let store = LocalStore::new(&path);
        store.open_if_needed().await.unwrap();
        assert_eq!(store.get::<DailyHealthRecord>(&r.key()).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn test_open_failure_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("daybook.db");
        let store = LocalStore::new(&path);
        assert!(matches!(
            store.open_if_needed().await,
            Err(SyncError::StorageFailure(_))
        ));
        assert!(!store.is_open().await);
    }
}
