use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::db::LocalStore;
use crate::error::{Result, SyncError};
use crate::models::{
    DailyHealthRecord, DataKind, EfficiencyFields, EfficiencySnapshot, HealthFields, KindStatus,
    MealRecord, StepFields, StepSnapshot, Summary, composite_key,
};
use crate::record::{DailyRecord, Record};
use crate::remote::RemoteRecordService;
use crate::repository::ReadRepository;
use crate::sync::{DEFAULT_STALE_AFTER, SyncEngine, UserProfile};

/// Snapshot of the facade's observable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub is_initialized: bool,
    pub is_syncing: bool,
    pub last_error: Option<String>,
    pub last_sync_times: HashMap<String, DateTime<Utc>>,
}

/// Entry point for presentation code.
///
/// Every call clears `last_error`, flags `is_syncing` while it runs and
/// publishes the resulting state to subscribers. Failures are recorded in
/// `last_error` and surface as `None`/`false`, never as `Err`.
pub struct SyncFacade {
    engine: SyncEngine,
    repo: ReadRepository,
    state: watch::Sender<SyncState>,
    in_flight: AtomicUsize,
    stale_after: Duration,
}

impl SyncFacade {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            engine: SyncEngine::new(store.clone(), clock.clone()),
            repo: ReadRepository::new(store, clock),
            state,
            in_flight: AtomicUsize::new(0),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    #[must_use]
    pub fn open(db_path: &Path) -> Self {
        Self::new(Arc::new(LocalStore::new(db_path)), Arc::new(SystemClock))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(LocalStore::in_memory()), Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    // --- Observable state ---

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.borrow().is_initialized
    }

    async fn run<T, F>(&self, op: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        let in_flight = InFlight::start(&self.in_flight, &self.state);

        let result = call.await;

        let times = self.engine.last_sync_times();
        let error = result.as_ref().err().map(ToString::to_string);
        if let Some(error) = &error {
            warn!(op, %error, "sync call failed");
        }
        self.state.send_modify(|s| {
            if error.is_some() {
                s.last_error = error;
            }
            s.last_sync_times = times;
        });
        drop(in_flight);
        result.ok()
    }

    // --- Lifecycle ---

    /// Open the local store. Safe to call more than once.
    pub async fn initialize(&self) -> bool {
        let opened = self
            .run("initialize", self.engine.store().open_if_needed())
            .await
            .is_some();
        if opened {
            self.state.send_modify(|s| s.is_initialized = true);
        }
        opened
    }

    // --- Writes ---

    pub async fn update<R: DailyRecord>(
        &self,
        user_id: &str,
        date: NaiveDate,
        patch: &R::Patch,
    ) -> Option<R> {
        self.run("update", self.engine.sync_fields::<R>(user_id, date, patch))
            .await
    }

    pub async fn update_health(
        &self,
        user_id: &str,
        date: NaiveDate,
        patch: &HealthFields,
    ) -> Option<DailyHealthRecord> {
        self.update::<DailyHealthRecord>(user_id, date, patch).await
    }

    pub async fn update_efficiency(
        &self,
        user_id: &str,
        date: NaiveDate,
        patch: &EfficiencyFields,
    ) -> Option<EfficiencySnapshot> {
        self.update::<EfficiencySnapshot>(user_id, date, patch)
            .await
    }

    /// Merge step fields. A patch that sets `steps` takes height and weight
    /// from the saved profile when neither the patch nor the stored snapshot
    /// has them.
    pub async fn update_steps(
        &self,
        user_id: &str,
        date: NaiveDate,
        patch: &StepFields,
    ) -> Option<StepSnapshot> {
        let call = async {
            let mut patch = patch.clone();
            if patch.steps.is_some() {
                let stored = self.repo.get::<StepSnapshot>(user_id, date).await?;
                let profile = self.engine.load_profile(user_id).await?;
                let (height, weight) = stored
                    .map_or((0.0, 0.0), |s| (s.user_height_cm, s.user_weight_kg));
                if height <= 0.0 {
                    patch.user_height_cm = patch.user_height_cm.or(profile.height_cm);
                }
                if weight <= 0.0 {
                    patch.user_weight_kg = patch.user_weight_kg.or(profile.weight_kg);
                }
            }
            self.engine
                .sync_fields::<StepSnapshot>(user_id, date, &patch)
                .await
        };
        self.run("update_steps", call).await
    }

    pub async fn save_meal(&self, meal: MealRecord) -> Option<MealRecord> {
        self.run("save_meal", self.engine.save_meal(meal)).await
    }

    pub async fn delete_meal(&self, user_id: &str, meal_id: &str) -> bool {
        self.run("delete_meal", self.engine.delete_meal(user_id, meal_id))
            .await
            .unwrap_or(false)
    }

    /// Returns the number of records removed.
    pub async fn clear_user_data(&self, user_id: &str) -> Option<usize> {
        self.run("clear_user_data", self.engine.clear_user_data(user_id))
            .await
    }

    pub async fn save_profile(&self, user_id: &str, profile: UserProfile) -> bool {
        self.run("save_profile", self.engine.save_profile(user_id, profile))
            .await
            .is_some()
    }

    pub async fn load_profile(&self, user_id: &str) -> Option<UserProfile> {
        self.run("load_profile", self.engine.load_profile(user_id))
            .await
    }

    // --- Freshness ---

    pub fn force_sync(&self, user_id: &str) {
        self.engine.force_sync(user_id);
        let times = self.engine.last_sync_times();
        self.state.send_modify(|s| s.last_sync_times = times);
    }

    #[must_use]
    pub fn needs_sync(&self, kind: DataKind, user_id: &str) -> bool {
        self.engine.needs_sync(kind, user_id, self.stale_after)
    }

    #[must_use]
    pub fn last_synced(&self, kind: DataKind, user_id: &str) -> Option<DateTime<Utc>> {
        self.engine.last_synced(kind, user_id)
    }

    // --- Reads ---

    pub async fn get<R: DailyRecord>(&self, user_id: &str, date: NaiveDate) -> Option<Option<R>> {
        self.run("get", self.repo.get::<R>(user_id, date)).await
    }

    pub async fn get_meal(&self, meal_id: &str) -> Option<Option<MealRecord>> {
        self.run("get_meal", self.repo.get_meal(meal_id)).await
    }

    pub async fn get_range<R: Record>(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Vec<R>> {
        self.run("get_range", self.repo.get_range::<R>(user_id, start, end))
            .await
    }

    pub async fn get_meals_for_day(&self, user_id: &str, date: NaiveDate) -> Option<Vec<MealRecord>> {
        self.run("get_meals_for_day", self.repo.get_meals_for_day(user_id, date))
            .await
    }

    pub async fn get_summary<R: Record>(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<Summary> {
        self.run("get_summary", self.repo.get_summary::<R>(user_id, start, end))
            .await
    }

    pub async fn get_weekly_summary<R: Record>(&self, user_id: &str) -> Option<Summary> {
        self.run("get_weekly_summary", self.repo.get_weekly_summary::<R>(user_id))
            .await
    }

    pub async fn get_monthly_summary<R: Record>(&self, user_id: &str) -> Option<Summary> {
        self.run("get_monthly_summary", self.repo.get_monthly_summary::<R>(user_id))
            .await
    }

    pub async fn kind_status<R: Record>(&self, user_id: &str) -> Option<KindStatus> {
        self.run("kind_status", self.repo.kind_status::<R>(user_id))
            .await
    }

    // --- Remote ---

    /// Copy the remote's records for `start..=end` into the local store.
    /// Returns how many records were stored.
    pub async fn refresh_from_remote<R, S>(
        &self,
        remote: &S,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Option<usize>
    where
        R: Record,
        S: RemoteRecordService<R>,
    {
        let call = async {
            let records = remote.query_range(user_id, start, end).await?;
            for record in &records {
                self.engine.store_record(record).await?;
            }
            Ok::<_, SyncError>(records.len())
        };
        self.run("refresh_from_remote", call).await
    }

    /// Send the local record for `(user_id, date)` to the remote.
    pub async fn push_to_remote<R, S>(&self, remote: &S, user_id: &str, date: NaiveDate) -> bool
    where
        R: DailyRecord,
        S: RemoteRecordService<R>,
    {
        let call = async {
            let record = self
                .repo
                .get::<R>(user_id, date)
                .await?
                .ok_or_else(|| {
                    SyncError::NotFound(format!("{} {}", R::KIND, composite_key(user_id, date)))
                })?;
            remote.put(&record).await
        };
        self.run("push_to_remote", call).await.is_some()
    }
}

/// Counts one running call. Dropping it, also when the call's future is
/// cancelled, clears `is_syncing` once no other call is running.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    state: &'a watch::Sender<SyncState>,
}

impl<'a> InFlight<'a> {
    fn start(count: &'a AtomicUsize, state: &'a watch::Sender<SyncState>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        state.send_modify(|s| {
            s.last_error = None;
            s.is_syncing = true;
        });
        Self { count, state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let still_running = self.count.fetch_sub(1, Ordering::SeqCst) > 1;
        self.state.send_modify(|s| s.is_syncing = still_running);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{MealItem, MealType, NutritionInfo};
    use crate::remote::MemoryRemote;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn facade() -> (Arc<ManualClock>, SyncFacade) {
        let clock = Arc::new(ManualClock::new(now()));
        let svc = SyncFacade::new(Arc::new(LocalStore::in_memory()), clock.clone());
        (clock, svc)
    }

    async fn ready() -> (Arc<ManualClock>, SyncFacade) {
        let (clock, svc) = facade();
        assert!(svc.initialize().await);
        (clock, svc)
    }

    #[tokio::test]
    async fn test_calls_before_initialize_capture_error() {
        let (_, svc) = facade();
        let patch = HealthFields {
            steps: Some(100),
            ..HealthFields::default()
        };
        assert!(svc.update_health("u1", day(15), &patch).await.is_none());

        let state = svc.state();
        assert!(!state.is_initialized);
        assert!(!state.is_syncing);
        assert_eq!(
            state.last_error.as_deref(),
            Some("local store is not initialized")
        );
        assert!(state.last_sync_times.is_empty());

        // A later successful call clears the error.
        assert!(svc.initialize().await);
        assert!(svc.update_health("u1", day(15), &patch).await.is_some());
        assert!(svc.last_error().is_none());
        assert!(svc.is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_, svc) = ready().await;
        assert!(svc.initialize().await);
        assert!(svc.state().is_initialized);
    }

    #[tokio::test]
    async fn test_update_publishes_state() {
        let (_, svc) = ready().await;
        let mut rx = svc.subscribe();

        let record = svc
            .update_health(
                "u1",
                day(15),
                &HealthFields {
                    sleep_hours: Some(7.5),
                    ..HealthFields::default()
                },
            )
            .await
            .unwrap();
        assert!((record.sleep_hours - 7.5).abs() < f64::EPSILON);

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert!(!state.is_syncing);
        assert_eq!(
            state.last_sync_times.get(&DataKind::Health.marker_key("u1")),
            Some(&now())
        );
        assert!(!svc.needs_sync(DataKind::Health, "u1"));
        assert!(svc.needs_sync(DataKind::Steps, "u1"));
    }

    #[tokio::test]
    async fn test_needs_sync_follows_configured_threshold() {
        let (clock, svc) = facade();
        let svc = svc.with_stale_after(Duration::from_secs(60));
        assert!(svc.initialize().await);
        svc.update_efficiency("u1", day(15), &EfficiencyFields::default())
            .await
            .unwrap();

        clock.advance(TimeDelta::seconds(60));
        assert!(!svc.needs_sync(DataKind::Efficiency, "u1"));
        clock.advance(TimeDelta::seconds(1));
        assert!(svc.needs_sync(DataKind::Efficiency, "u1"));

        svc.update_efficiency("u1", day(15), &EfficiencyFields::default())
            .await
            .unwrap();
        svc.force_sync("u1");
        assert!(svc.needs_sync(DataKind::Efficiency, "u1"));
        assert!(svc.state().last_sync_times.is_empty());
    }

    #[tokio::test]
    async fn test_update_steps_uses_profile() {
        let (_, svc) = ready().await;
        assert!(
            svc.save_profile(
                "u1",
                UserProfile {
                    height_cm: Some(180.0),
                    weight_kg: Some(80.0),
                },
            )
            .await
        );

        let snap = svc
            .update_steps(
                "u1",
                day(15),
                &StepFields {
                    steps: Some(10_000),
                    ..StepFields::default()
                },
            )
            .await
            .unwrap();
        assert!((snap.user_height_cm - 180.0).abs() < f64::EPSILON);
        let expected_km = 10_000.0 * 180.0 * 0.415 / 100.0 / 1000.0;
        assert!((snap.distance_km - expected_km).abs() < 1e-9);
        assert!((snap.calories - expected_km * 80.0 * 1.036).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_status_only_step_update_keeps_overrides() {
        let (_, svc) = ready().await;
        svc.save_profile(
            "u1",
            UserProfile {
                height_cm: Some(180.0),
                weight_kg: Some(80.0),
            },
        )
        .await;

        let snap = svc
            .update_steps(
                "u1",
                day(15),
                &StepFields {
                    steps: Some(10_000),
                    distance_km: Some(5.0),
                    calories: Some(100.0),
                    ..StepFields::default()
                },
            )
            .await
            .unwrap();
        assert!((snap.distance_km - 5.0).abs() < f64::EPSILON);

        let snap = svc
            .update_steps(
                "u1",
                day(15),
                &StepFields {
                    status: Some("walking".to_string()),
                    ..StepFields::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(snap.status, "walking");
        assert!((snap.distance_km - 5.0).abs() < f64::EPSILON);
        assert!((snap.calories - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_stored_height_wins_over_profile() {
        let (_, svc) = ready().await;
        let first = StepFields {
            steps: Some(1000),
            user_height_cm: Some(160.0),
            user_weight_kg: Some(55.0),
            ..StepFields::default()
        };
        svc.update_steps("u1", day(15), &first).await.unwrap();
        svc.save_profile(
            "u1",
            UserProfile {
                height_cm: Some(190.0),
                weight_kg: Some(90.0),
            },
        )
        .await;

        let snap = svc
            .update_steps(
                "u1",
                day(15),
                &StepFields {
                    steps: Some(2000),
                    ..StepFields::default()
                },
            )
            .await
            .unwrap();
        assert!((snap.user_height_cm - 160.0).abs() < f64::EPSILON);
        assert!((snap.user_weight_kg - 55.0).abs() < f64::EPSILON);
        let expected_km = 2000.0 * 160.0 * 0.415 / 100.0 / 1000.0;
        assert!((snap.distance_km - expected_km).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancelled_call_clears_syncing() {
        let (_, svc) = ready().await;
        let key = composite_key("u1", day(15));
        let held = svc.engine.lock_record(DataKind::Health, &key).await;
        {
            let patch = HealthFields::default();
            let pending = svc.update_health("u1", day(15), &patch);
            tokio::pin!(pending);
            tokio::select! {
                biased;
                _ = &mut pending => panic!("update ran while the key was held"),
                () = std::future::ready(()) => {}
            }
            assert!(svc.state().is_syncing);
        }
        assert!(!svc.state().is_syncing);
        drop(held);
        assert!(svc.update_health("u1", day(15), &HealthFields::default()).await.is_some());
    }

    #[tokio::test]
    async fn test_meals_through_facade() {
        let (_, svc) = ready().await;
        let mut meal = MealRecord::new("u1", MealType::Lunch, now());
        meal.items.push(MealItem::manual(
            "rice",
            NutritionInfo {
                calories: 200.0,
                ..NutritionInfo::default()
            },
            1.5,
        ));
        let saved = svc.save_meal(meal.clone()).await.unwrap();
        assert!((saved.totals().calories - 300.0).abs() < 1e-9);

        let meals = svc.get_meals_for_day("u1", day(15)).await.unwrap();
        assert_eq!(meals.len(), 1);

        assert!(!svc.delete_meal("u2", &meal.id).await);
        assert!(svc.last_error().is_none());
        assert!(svc.delete_meal("u1", &meal.id).await);
        assert_eq!(svc.get_meal(&meal.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_user_data_then_reads_are_blank() {
        let (_, svc) = ready().await;
        for d in 10..=12 {
            svc.update_health(
                "u1",
                day(d),
                &HealthFields {
                    steps: Some(1000),
                    ..HealthFields::default()
                },
            )
            .await
            .unwrap();
        }
        assert_eq!(svc.clear_user_data("u1").await, Some(3));
        assert!(svc.needs_sync(DataKind::Health, "u1"));

        let range: Vec<DailyHealthRecord> = svc.get_range("u1", day(10), day(12)).await.unwrap();
        assert_eq!(range.len(), 3);
        assert!(range.iter().all(|r| r.steps == 0));

        let summary = svc
            .get_summary::<DailyHealthRecord>("u1", day(10), day(12))
            .await
            .unwrap();
        assert_eq!(summary.count, 0);
    }

    #[tokio::test]
    async fn test_refresh_from_remote() {
        let (_, svc) = ready().await;
        let mut remote_record = DailyHealthRecord::new("u1", day(14), now());
        remote_record.steps = 4321;
        let remote = MemoryRemote::with_records([remote_record]);

        let pulled = svc
            .refresh_from_remote::<DailyHealthRecord, _>(&remote, "u1", day(10), day(16))
            .await;
        assert_eq!(pulled, Some(1));

        let local: DailyHealthRecord = svc.get("u1", day(14)).await.unwrap().unwrap();
        assert_eq!(local.steps, 4321);
        assert!(!svc.needs_sync(DataKind::Health, "u1"));
    }

    #[tokio::test]
    async fn test_push_to_remote() {
        let (_, svc) = ready().await;
        let remote: MemoryRemote<DailyHealthRecord> = MemoryRemote::new();

        assert!(!svc.push_to_remote::<DailyHealthRecord, _>(&remote, "u1", day(15)).await);
        assert!(svc.last_error().unwrap().starts_with("not found"));

        svc.update_health(
            "u1",
            day(15),
            &HealthFields {
                calories_in: Some(2100.0),
                ..HealthFields::default()
            },
        )
        .await
        .unwrap();
        assert!(svc.push_to_remote::<DailyHealthRecord, _>(&remote, "u1", day(15)).await);
        let pushed = remote.snapshot(&composite_key("u1", day(15))).unwrap();
        assert!((pushed.calories_in - 2100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_offline_remote_is_captured() {
        let (_, svc) = ready().await;
        let remote: MemoryRemote<DailyHealthRecord> = MemoryRemote::new();
        remote.set_offline(true);

        assert_eq!(
            svc.refresh_from_remote::<DailyHealthRecord, _>(&remote, "u1", day(10), day(16)).await,
            None
        );
        let state = svc.state();
        assert!(state.last_error.unwrap().starts_with("remote unavailable"));
        assert!(!state.is_syncing);
    }
}
