//! Sync engine: field-level merge writes into the local store and per-kind
//! freshness markers.
//!
//! Writes are last-writer-wins at field granularity. Read-merge-write of one
//! `(kind, user, day)` key is serialized by a per-key async lock, so two
//! in-flight updates to the same day cannot drop each other's fields.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::db::LocalStore;
use crate::error::Result;
use crate::models::{
    DailyHealthRecord, DataKind, EfficiencySnapshot, MealRecord, StepSnapshot, composite_key,
};
use crate::record::{DailyRecord, Record};

/// Default age after which a data kind is reported as needing a sync.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Anthropometrics kept in the settings partition, used for step derivations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserProfile {
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    clock: Arc<dyn Clock>,
    freshness: Mutex<HashMap<String, DateTime<Utc>>>,
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            freshness: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // --- Per-key serialization ---

    /// Hold the lock of one `(kind, key)` until the guard drops.
    pub(crate) async fn lock_record(&self, kind: DataKind, key: &str) -> KeyGuard<'_> {
        let mut guard = KeyGuard {
            locks: &self.key_locks,
            held: None,
        };
        let lock = self
            .key_locks
            .lock()
            .entry(format!("{kind}:{key}"))
            .or_default()
            .clone();
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    // --- Writes ---

    /// Merge `patch` into the stored record for `(R::KIND, user_id, date)`,
    /// creating a zero-valued record first if none exists.
    pub async fn sync_fields<R: DailyRecord>(
        &self,
        user_id: &str,
        date: NaiveDate,
        patch: &R::Patch,
    ) -> Result<R> {
        let key = composite_key(user_id, date);
        let result = {
            let _held = self.lock_record(R::KIND, &key).await;
            self.merge_and_put::<R>(&key, user_id, date, patch).await
        };

        let record = result?;
        self.mark_synced(R::KIND, user_id);
        Ok(record)
    }

    async fn merge_and_put<R: DailyRecord>(
        &self,
        key: &str,
        user_id: &str,
        date: NaiveDate,
        patch: &R::Patch,
    ) -> Result<R> {
        let now = self.clock.now();
        let record = match self.store.get::<R>(key).await? {
            Some(mut existing) => {
                existing.apply(patch);
                existing.set_updated_at(now);
                existing
            }
            None => {
                let mut fresh = R::blank(user_id, date, now);
                fresh.apply(patch);
                fresh
            }
        };
        self.store.put(key, &record).await?;
        debug!(kind = %R::KIND, %key, "fields synced");
        Ok(record)
    }

    /// Upsert a meal. An existing meal keeps its `created_at`.
    pub async fn save_meal(&self, meal: MealRecord) -> Result<MealRecord> {
        let result = {
            let _held = self.lock_record(DataKind::Meal, &meal.id).await;
            self.upsert_meal(meal).await
        };

        let meal = result?;
        self.mark_synced(DataKind::Meal, &meal.user_id);
        Ok(meal)
    }

    async fn upsert_meal(&self, mut meal: MealRecord) -> Result<MealRecord> {
        let now = self.clock.now();
        let existing = self.store.get::<MealRecord>(&meal.id).await?;
        meal.created_at = existing.map_or(now, |m| m.created_at);
        meal.updated_at = now;
        self.store.put(&meal.id, &meal).await?;
        Ok(meal)
    }

    /// Delete one of the user's meals. Meals owned by other users are left alone.
    pub async fn delete_meal(&self, user_id: &str, meal_id: &str) -> Result<bool> {
        let owned = self
            .store
            .get::<MealRecord>(meal_id)
            .await?
            .is_some_and(|m| m.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        let deleted = self.store.delete(DataKind::Meal, meal_id).await?;
        self.mark_synced(DataKind::Meal, user_id);
        Ok(deleted)
    }

    /// Store a whole record as-is (e.g. one pulled from the remote service).
    pub async fn store_record<R: Record>(&self, record: &R) -> Result<()> {
        let key = record.key();
        let result = {
            let _held = self.lock_record(R::KIND, &key).await;
            self.store.put(&key, record).await
        };

        result?;
        self.mark_synced(R::KIND, record.user_id());
        Ok(())
    }

    /// Remove every record, setting and freshness marker belonging to `user_id`.
    /// Returns the number of records removed.
    pub async fn clear_user_data(&self, user_id: &str) -> Result<usize> {
        let mut removed = 0;
        removed += self.delete_user_records::<DailyHealthRecord>(user_id).await?;
        removed += self.delete_user_records::<MealRecord>(user_id).await?;
        removed += self.delete_user_records::<EfficiencySnapshot>(user_id).await?;
        removed += self.delete_user_records::<StepSnapshot>(user_id).await?;
        for name in PROFILE_SETTINGS {
            self.store
                .delete_setting(&profile_key(user_id, name))
                .await?;
        }
        self.force_sync(user_id);
        info!(%user_id, removed, "user data cleared");
        Ok(removed)
    }

    async fn delete_user_records<R: Record>(&self, user_id: &str) -> Result<usize> {
        let mut removed = 0;
        for record in self.store.scan::<R>().await? {
            if record.user_id() == user_id && self.store.delete(R::KIND, &record.key()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // --- Profile ---

    pub async fn save_profile(&self, user_id: &str, profile: UserProfile) -> Result<()> {
        for (name, value) in PROFILE_SETTINGS
            .into_iter()
            .zip([profile.height_cm, profile.weight_kg])
        {
            let key = profile_key(user_id, name);
            match value {
                Some(v) => self.store.set_setting(&key, &v.to_string()).await?,
                None => {
                    self.store.delete_setting(&key).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<UserProfile> {
        let [height, weight] = PROFILE_SETTINGS;
        Ok(UserProfile {
            height_cm: self.setting_f64(&profile_key(user_id, height)).await?,
            weight_kg: self.setting_f64(&profile_key(user_id, weight)).await?,
        })
    }

    async fn setting_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self
            .store
            .get_setting(key)
            .await?
            .and_then(|v| v.parse::<f64>().ok()))
    }

    // --- Freshness ---

    fn mark_synced(&self, kind: DataKind, user_id: &str) {
        let now = self.clock.now();
        self.freshness.lock().insert(kind.marker_key(user_id), now);
    }

    #[must_use]
    pub fn last_synced(&self, kind: DataKind, user_id: &str) -> Option<DateTime<Utc>> {
        self.freshness
            .lock()
            .get(&kind.marker_key(user_id))
            .copied()
    }

    /// True when `kind` was never synced for `user_id` in this process, or
    /// its marker is older than `threshold`.
    #[must_use]
    pub fn needs_sync(&self, kind: DataKind, user_id: &str, threshold: Duration) -> bool {
        let Some(marker) = self.last_synced(kind, user_id) else {
            return true;
        };
        match (self.clock.now() - marker).to_std() {
            Ok(age) => age > threshold,
            // Marker in the future: clock went backwards, treat as fresh.
            Err(_) => false,
        }
    }

    /// Drop every freshness marker of `user_id` so the next check reports stale.
    pub fn force_sync(&self, user_id: &str) {
        let mut markers = self.freshness.lock();
        for kind in DataKind::ALL {
            markers.remove(&kind.marker_key(user_id));
        }
    }

    #[must_use]
    pub fn last_sync_times(&self) -> HashMap<String, DateTime<Utc>> {
        self.freshness.lock().clone()
    }
}

/// Settings written by `save_profile`, in `UserProfile` field order.
const PROFILE_SETTINGS: [&str; 2] = ["height_cm", "weight_kg"];

fn profile_key(user_id: &str, name: &str) -> String {
    format!("{user_id}:{name}")
}

/// Exclusive hold on one record key. Dropping it, also when the owning future
/// is cancelled mid-await, releases the lock and prunes idle map entries.
pub(crate) struct KeyGuard<'a> {
    locks: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
