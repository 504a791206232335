use std::sync::Arc;

use chrono::{Datelike, Days, Months, NaiveDate};

use crate::clock::Clock;
use crate::db::LocalStore;
use crate::error::Result;
use crate::models::{FieldStat, KindStatus, MealRecord, Summary, composite_key};
use crate::record::{DailyRecord, Record};

/// Read side over the local store: point lookups, date ranges and aggregates.
/// Nothing here writes.
pub struct ReadRepository {
    store: Arc<LocalStore>,
    clock: Arc<dyn Clock>,
}

impl ReadRepository {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get<R: DailyRecord>(&self, user_id: &str, date: NaiveDate) -> Result<Option<R>> {
        self.store.get(&composite_key(user_id, date)).await
    }

    pub async fn get_meal(&self, meal_id: &str) -> Result<Option<MealRecord>> {
        self.store.get(meal_id).await
    }

    /// Records of `user_id` between `start` and `end` inclusive, ascending.
    ///
    /// Kinds that fill missing days (health) return exactly one record per day;
    /// the others return only what is stored.
    pub async fn get_range<R: Record>(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<R>> {
        let stored = self.stored_in_range::<R>(user_id, start, end).await?;
        let now = self.clock.now();
        if R::fill_missing_day(user_id, start, now).is_none() {
            return Ok(stored);
        }

        let mut out = Vec::with_capacity(stored.len());
        let mut stored = stored.into_iter().peekable();
        for day in start.iter_days().take_while(|d| *d <= end) {
            let mut found = false;
            while let Some(record) = stored.next_if(|r| r.date() <= day) {
                if record.date() == day && !found {
                    out.push(record);
                    found = true;
                }
            }
            if !found {
                if let Some(filler) = R::fill_missing_day(user_id, day, now) {
                    out.push(filler);
                }
            }
        }
        Ok(out)
    }

    pub async fn get_meals_for_day(&self, user_id: &str, date: NaiveDate) -> Result<Vec<MealRecord>> {
        self.get_range(user_id, date, date).await
    }

    async fn stored_in_range<R: Record>(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<R>> {
        if start > end {
            return Ok(Vec::new());
        }
        // One day of padding on both sides, compared strictly.
        let after = start.checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN);
        let before = end.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);

        let mut records: Vec<R> = self
            .store
            .scan::<R>()
            .await?
            .into_iter()
            .filter(|r| r.user_id() == user_id && r.date() > after && r.date() < before)
            .collect();
        records.sort_by_key(Record::order_key);
        Ok(records)
    }

    // --- Aggregates ---

    /// Count, totals and means of every numeric field over `start..=end`.
    /// An empty window yields all-zero statistics.
    pub async fn get_summary<R: Record>(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Summary> {
        let records = self.stored_in_range::<R>(user_id, start, end).await?;
        Ok(summarize(user_id, start, end, &records))
    }

    /// Monday through Sunday of the current week.
    pub async fn get_weekly_summary<R: Record>(&self, user_id: &str) -> Result<Summary> {
        let (start, end) = week_bounds(self.clock.today());
        self.get_summary::<R>(user_id, start, end).await
    }

    /// First through last day of the current calendar month.
    pub async fn get_monthly_summary<R: Record>(&self, user_id: &str) -> Result<Summary> {
        let (start, end) = month_bounds(self.clock.today());
        self.get_summary::<R>(user_id, start, end).await
    }

    /// Stored record count of one kind for `user_id`, with the newest `updated_at`.
    pub async fn kind_status<R: Record>(&self, user_id: &str) -> Result<KindStatus> {
        let mut status = KindStatus {
            kind: R::KIND,
            records: 0,
            last_updated: None,
        };
        for record in self.store.scan::<R>().await? {
            if record.user_id() == user_id {
                status.records += 1;
                status.last_updated = status.last_updated.max(Some(record.updated_at()));
            }
        }
        Ok(status)
    }
}

#[allow(clippy::cast_precision_loss)]
fn summarize<R: Record>(user_id: &str, start: NaiveDate, end: NaiveDate, records: &[R]) -> Summary {
    let mut totals = vec![0.0; R::NUMERIC_FIELDS.len()];
    for record in records {
        for (total, value) in totals.iter_mut().zip(record.numeric_values()) {
            *total += value;
        }
    }
    let count = records.len();
    let fields = R::NUMERIC_FIELDS
        .iter()
        .copied()
        .zip(totals)
        .map(|(name, total)| FieldStat {
            name,
            total,
            average: if count == 0 { 0.0 } else { total / count as f64 },
        })
        .collect();

    Summary {
        kind: R::KIND,
        user_id: user_id.to_string(),
        start,
        end,
        count,
        fields,
    }
}

#[must_use]
pub fn week_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let offset = u64::from(today.weekday().num_days_from_monday());
    let start = today.checked_sub_days(Days::new(offset)).unwrap_or(today);
    let end = start.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX);
    (start, end)
}

#[must_use]
pub fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_days(Days::new(u64::from(today.day0())))
        .unwrap_or(today);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{
        DailyHealthRecord, EfficiencySnapshot, MealItem, MealType, NutritionInfo, StepSnapshot,
    };

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    // Wednesday
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 19, 10, 0, 0).unwrap()
    }

    async fn repo() -> (Arc<LocalStore>, ReadRepository) {
        let store = Arc::new(LocalStore::in_memory());
        store.open_if_needed().await.unwrap();
        let repo = ReadRepository::new(store.clone(), Arc::new(ManualClock::new(now())));
        (store, repo)
    }

    async fn put_health(store: &LocalStore, user: &str, date: NaiveDate, steps: i64, sleep: f64) {
        let mut r = DailyHealthRecord::new(user, date, now());
        r.steps = steps;
        r.sleep_hours = sleep;
        store.put(&r.key(), &r).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_range_fills_every_day_on_empty_store() {
        let (_, repo) = repo().await;
        let range: Vec<DailyHealthRecord> =
            repo.get_range("u1", day(6, 10), day(6, 16)).await.unwrap();

        assert_eq!(range.len(), 7);
        for (i, r) in range.iter().enumerate() {
            assert_eq!(r.date, day(6, 10 + i as u32));
            assert_eq!(r.steps, 0);
            assert!((r.sleep_hours).abs() < f64::EPSILON);
            assert_eq!(r.user_id, "u1");
        }
    }

    #[tokio::test]
    async fn test_health_range_mixes_stored_and_filled() {
        let (store, repo) = repo().await;
        put_health(&store, "u1", day(6, 12), 4000, 7.0).await;
        put_health(&store, "u1", day(6, 9), 9999, 9.0).await; // outside range
        put_health(&store, "u2", day(6, 11), 3000, 6.0).await; // other user

        let range: Vec<DailyHealthRecord> =
            repo.get_range("u1", day(6, 10), day(6, 13)).await.unwrap();
        assert_eq!(range.len(), 4);
        let steps: Vec<i64> = range.iter().map(|r| r.steps).collect();
        assert_eq!(steps, vec![0, 0, 4000, 0]);

        // reads never write the filled days
        assert_eq!(store.scan::<DailyHealthRecord>().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sparse_kinds_do_not_fill() {
        let (store, repo) = repo().await;
        let meals: Vec<MealRecord> = repo.get_range("u1", day(6, 10), day(6, 16)).await.unwrap();
        assert!(meals.is_empty());

        let mut snap = StepSnapshot::new("u1", day(6, 14), now());
        snap.steps = 1234;
        store.put(&snap.key(), &snap).await.unwrap();
        let steps: Vec<StepSnapshot> = repo.get_range("u1", day(6, 10), day(6, 16)).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].steps, 1234);
    }

    #[tokio::test]
    async fn test_range_bounds_are_inclusive() {
        let (store, repo) = repo().await;
        for d in 9..=17 {
            let snap = EfficiencySnapshot::new("u1", day(6, d), now());
            store.put(&snap.key(), &snap).await.unwrap();
        }
        let range: Vec<EfficiencySnapshot> =
            repo.get_range("u1", day(6, 10), day(6, 16)).await.unwrap();
        assert_eq!(range.first().unwrap().date, day(6, 10));
        assert_eq!(range.last().unwrap().date, day(6, 16));
        assert_eq!(range.len(), 7);

        let backwards: Vec<DailyHealthRecord> =
            repo.get_range("u1", day(6, 16), day(6, 10)).await.unwrap();
        assert!(backwards.is_empty());
    }

    #[tokio::test]
    async fn test_meals_for_day_sorted_by_time() {
        let (store, repo) = repo().await;
        let at = |h: u32| Utc.with_ymd_and_hms(2024, 6, 18, h, 0, 0).unwrap();
        for (hour, meal_type) in [(19, MealType::Dinner), (8, MealType::Breakfast), (13, MealType::Lunch)] {
            let meal = MealRecord::new("u1", meal_type, at(hour));
            store.put(&meal.id, &meal).await.unwrap();
        }
        let other_day = MealRecord::new("u1", MealType::Snack, at(8) + chrono::TimeDelta::days(1));
        store.put(&other_day.id, &other_day).await.unwrap();

        let meals = repo.get_meals_for_day("u1", day(6, 18)).await.unwrap();
        let types: Vec<MealType> = meals.iter().map(|m| m.meal_type).collect();
        assert_eq!(types, vec![MealType::Breakfast, MealType::Lunch, MealType::Dinner]);
        assert_eq!(repo.get_meal(&other_day.id).await.unwrap(), Some(other_day));
    }

    #[tokio::test]
    async fn test_weekly_summary_empty_is_zero() {
        let (_, repo) = repo().await;
        let summary = repo
            .get_weekly_summary::<DailyHealthRecord>("u1")
            .await
            .unwrap();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.fields.len(), DailyHealthRecord::NUMERIC_FIELDS.len());
        for f in &summary.fields {
            assert!((f.total).abs() < f64::EPSILON);
            assert!((f.average).abs() < f64::EPSILON);
            assert!(!f.average.is_nan());
        }
    }

    #[tokio::test]
    async fn test_weekly_summary_uses_monday_to_sunday() {
        let (store, repo) = repo().await;
        put_health(&store, "u1", day(6, 16), 50_000, 10.0).await; // previous Sunday
        put_health(&store, "u1", day(6, 17), 6000, 7.0).await; // Monday
        put_health(&store, "u1", day(6, 19), 8000, 8.0).await;
        put_health(&store, "u1", day(6, 23), 10_000, 6.0).await; // Sunday
        put_health(&store, "u1", day(6, 24), 50_000, 10.0).await; // next Monday

        let summary = repo
            .get_weekly_summary::<DailyHealthRecord>("u1")
            .await
            .unwrap();
        assert_eq!(summary.start, day(6, 17));
        assert_eq!(summary.end, day(6, 23));
        assert_eq!(summary.count, 3);
        assert!((summary.total("steps") - 24_000.0).abs() < f64::EPSILON);
        assert!((summary.average("steps") - 8000.0).abs() < f64::EPSILON);
        assert!((summary.average("sleep_hours") - 7.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_monthly_summary_of_meals() {
        let (store, repo) = repo().await;
        let item = |cal: f64| {
            MealItem::manual(
                "food",
                NutritionInfo {
                    calories: cal,
                    protein: 10.0,
                    ..NutritionInfo::default()
                },
                1.0,
            )
        };
        let mut a = MealRecord::new("u1", MealType::Lunch, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        a.items = vec![item(500.0), item(100.0)];
        let mut b = MealRecord::new("u1", MealType::Dinner, Utc.with_ymd_and_hms(2024, 6, 30, 19, 0, 0).unwrap());
        b.items = vec![item(900.0)];
        let mut c = MealRecord::new("u1", MealType::Dinner, Utc.with_ymd_and_hms(2024, 7, 1, 19, 0, 0).unwrap());
        c.items = vec![item(5000.0)];
        for m in [&a, &b, &c] {
            store.put(&m.id, m).await.unwrap();
        }

        let summary = repo.get_monthly_summary::<MealRecord>("u1").await.unwrap();
        assert_eq!((summary.start, summary.end), (day(6, 1), day(6, 30)));
        assert_eq!(summary.count, 2);
        assert!((summary.total("calories") - 1500.0).abs() < 1e-9);
        assert!((summary.average("calories") - 750.0).abs() < 1e-9);
        assert!((summary.total("items") - 3.0).abs() < f64::EPSILON);
        assert!((summary.average("protein") - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_kind_status_counts_stored_records() {
        let (store, repo) = repo().await;
        let empty = repo.kind_status::<DailyHealthRecord>("u1").await.unwrap();
        assert_eq!(empty.records, 0);
        assert_eq!(empty.last_updated, None);

        put_health(&store, "u1", day(6, 10), 100, 7.0).await;
        let mut later = DailyHealthRecord::new("u1", day(6, 11), now());
        later.updated_at = now() + chrono::TimeDelta::hours(2);
        store.put(&later.key(), &later).await.unwrap();
        put_health(&store, "u2", day(6, 12), 100, 7.0).await;

        let status = repo.kind_status::<DailyHealthRecord>("u1").await.unwrap();
        assert_eq!(status.kind, crate::models::DataKind::Health);
        assert_eq!(status.records, 2);
        assert_eq!(status.last_updated, Some(later.updated_at));
        assert_eq!(repo.kind_status::<StepSnapshot>("u1").await.unwrap().records, 0);
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(week_bounds(day(6, 17)), (day(6, 17), day(6, 23)));
        assert_eq!(week_bounds(day(6, 23)), (day(6, 17), day(6, 23)));
        assert_eq!(month_bounds(day(2, 29)), (day(2, 1), day(2, 29)));
        assert_eq!(
            month_bounds(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()),
            (
                NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
            )
        );
    }
}
