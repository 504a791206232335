//! Persisted record kinds and their numbered-field layouts.
//!
//! Field numbers are part of the on-disk format: never renumber or reuse one.
//! New attributes take the next free number.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::codec::{CodecError, Fields, decode_record, encode_record};
use crate::models::{
    DailyHealthRecord, DataKind, EfficiencyFields, EfficiencySnapshot, GoalRecord, HealthFields,
    MealItem, MealRecord, MealType, NutritionInfo, Priority, RecognitionMethod, RoutineRecord,
    StepFields, StepSnapshot, TaskRecord, composite_key, date_to_millis, millis_to_date,
};

/// A record kind that lives in one local partition.
pub trait Record: Clone + Send + Sync + 'static {
    const KIND: DataKind;
    /// First byte of every encoded record of this kind.
    const TYPE_ID: u8;
    /// Names of the values returned by [`Record::numeric_values`], in order.
    const NUMERIC_FIELDS: &'static [&'static str];

    fn key(&self) -> String;
    fn user_id(&self) -> &str;
    /// Calendar day the record belongs to, used for range filtering.
    fn date(&self) -> NaiveDate;
    fn numeric_values(&self) -> Vec<f64>;
    fn updated_at(&self) -> DateTime<Utc>;

    /// Sort key within a range result; records of one day keep key order by default.
    fn order_key(&self) -> i64 {
        date_to_millis(self.date())
    }

    /// Stand-in for a day with no stored record in a range query. Kinds that
    /// return `None` produce sparse ranges.
    fn fill_missing_day(_user_id: &str, _date: NaiveDate, _now: DateTime<Utc>) -> Option<Self> {
        None
    }

    fn to_fields(&self) -> Fields;
    fn from_fields(fields: &Fields) -> Result<Self, CodecError>;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_record(Self::TYPE_ID, &self.to_fields())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_fields(&decode_record(Self::TYPE_ID, bytes)?)
    }
}

/// A record with at most one instance per user and day, updated by field-level patches.
pub trait DailyRecord: Record {
    type Patch: Clone + Send + Sync;

    /// Zero-valued record with `created_at = updated_at = now`.
    fn blank(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self;

    /// Overwrite every field set in `patch`, leaving the rest untouched.
    fn apply(&mut self, patch: &Self::Patch);

    fn set_updated_at(&mut self, now: DateTime<Utc>);
}

fn millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn read_datetime(fields: &Fields, field: u8) -> Result<DateTime<Utc>, CodecError> {
    let ms = fields.int(field)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(CodecError::InvalidTimestamp(ms))
}

fn read_opt_datetime(fields: &Fields, field: u8) -> Result<Option<DateTime<Utc>>, CodecError> {
    match fields.opt_int(field)? {
        None => Ok(None),
        Some(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Some)
            .ok_or(CodecError::InvalidTimestamp(ms)),
    }
}

fn read_date(fields: &Fields, field: u8) -> Result<NaiveDate, CodecError> {
    let ms = fields.int(field)?;
    millis_to_date(ms).ok_or(CodecError::InvalidTimestamp(ms))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: i64) -> f64 {
    v as f64
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// --- Daily health ---

impl Record for DailyHealthRecord {
    const KIND: DataKind = DataKind::Health;
    const TYPE_ID: u8 = 1;
    const NUMERIC_FIELDS: &'static [&'static str] = &[
        "sleep_hours",
        "steps",
        "calories_in",
        "calories_out",
        "tasks_done",
        "goal_progress",
        "efficiency_score",
        "health_score",
    ];

    fn key(&self) -> String {
        composite_key(&self.user_id, self.date)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn numeric_values(&self) -> Vec<f64> {
        vec![
            self.sleep_hours,
            as_f64(self.steps),
            self.calories_in,
            self.calories_out,
            as_f64(self.tasks_done),
            self.goal_progress,
            self.efficiency_score,
            self.health_score,
        ]
    }

    fn fill_missing_day(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Option<Self> {
        Some(Self::new(user_id, date, now))
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with(0, self.user_id.as_str())
            .with(1, date_to_millis(self.date))
            .with(2, self.sleep_hours)
            .with(3, self.steps)
            .with(4, self.calories_in)
            .with(5, self.calories_out)
            .with(6, self.tasks_done)
            .with(7, self.goal_progress)
            .with(8, self.efficiency_score)
            .with(9, self.health_score)
            .with(10, millis(self.created_at))
            .with(11, millis(self.updated_at))
    }

    fn from_fields(f: &Fields) -> Result<Self, CodecError> {
        Ok(Self {
            user_id: f.string(0)?,
            date: read_date(f, 1)?,
            sleep_hours: f.double(2)?,
            steps: f.int(3)?,
            calories_in: f.double(4)?,
            calories_out: f.double(5)?,
            tasks_done: f.int(6)?,
            goal_progress: f.double(7)?,
            efficiency_score: f.double(8)?,
            health_score: f.double(9)?,
            created_at: read_datetime(f, 10)?,
            updated_at: read_datetime(f, 11)?,
        })
    }
}

impl DailyRecord for DailyHealthRecord {
    type Patch = HealthFields;

    fn blank(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self::new(user_id, date, now)
    }

    fn apply(&mut self, patch: &HealthFields) {
        if let Some(v) = patch.sleep_hours {
            self.sleep_hours = v;
        }
        if let Some(v) = patch.steps {
            self.steps = v;
        }
        if let Some(v) = patch.calories_in {
            self.calories_in = v;
        }
        if let Some(v) = patch.calories_out {
            self.calories_out = v;
        }
        if let Some(v) = patch.tasks_done {
            self.tasks_done = v;
        }
        if let Some(v) = patch.goal_progress {
            self.goal_progress = v;
        }
        if let Some(v) = patch.efficiency_score {
            self.efficiency_score = v;
        }
        if let Some(v) = patch.health_score {
            self.health_score = v;
        }
    }

    fn set_updated_at(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

// --- Meals ---

fn nutrition_to_fields(n: &NutritionInfo) -> Fields {
    Fields::new()
        .with(0, n.calories)
        .with(1, n.protein)
        .with(2, n.carbs)
        .with(3, n.fat)
        .with(4, n.fiber)
        .with(5, n.sugar)
        .with(6, n.sodium)
}

fn nutrition_from_fields(f: &Fields) -> Result<NutritionInfo, CodecError> {
    Ok(NutritionInfo {
        calories: f.double(0)?,
        protein: f.double(1)?,
        carbs: f.double(2)?,
        fat: f.double(3)?,
        fiber: f.double(4)?,
        sugar: f.double(5)?,
        sodium: f.double(6)?,
    })
}

fn meal_item_to_fields(item: &MealItem) -> Fields {
    Fields::new()
        .with(0, item.food_name.as_str())
        .with(1, nutrition_to_fields(&item.nutrition))
        .with(2, item.portion)
        .with(3, item.barcode.clone())
        .with(4, item.image_url.clone())
        .with(5, item.recognition.as_str())
}

fn meal_item_from_fields(f: &Fields) -> Result<MealItem, CodecError> {
    Ok(MealItem {
        food_name: f.string(0)?,
        nutrition: nutrition_from_fields(&f.object(1)?)?,
        // Items written before portions existed count as one portion.
        portion: if f.contains(2) { f.double(2)? } else { 1.0 },
        barcode: f.opt_string(3)?,
        image_url: f.opt_string(4)?,
        recognition: RecognitionMethod::from_stored(&f.string(5)?),
    })
}

impl Record for MealRecord {
    const KIND: DataKind = DataKind::Meal;
    const TYPE_ID: u8 = 2;
    const NUMERIC_FIELDS: &'static [&'static str] =
        &["calories", "protein", "carbs", "fat", "items"];

    fn key(&self) -> String {
        self.id.clone()
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.logged_at.date_naive()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn order_key(&self) -> i64 {
        millis(self.logged_at)
    }

    #[allow(clippy::cast_precision_loss)]
    fn numeric_values(&self) -> Vec<f64> {
        let totals = self.totals();
        vec![
            totals.calories,
            totals.protein,
            totals.carbs,
            totals.fat,
            self.items.len() as f64,
        ]
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with(0, self.id.as_str())
            .with(1, self.user_id.as_str())
            .with(2, self.meal_type.as_str())
            .with(
                3,
                self.items
                    .iter()
                    .map(meal_item_to_fields)
                    .collect::<Vec<_>>(),
            )
            .with(4, millis(self.logged_at))
            .with(5, self.notes.clone())
            .with(6, self.image_url.clone())
            .with(7, millis(self.created_at))
            .with(8, millis(self.updated_at))
    }

    fn from_fields(f: &Fields) -> Result<Self, CodecError> {
        Ok(Self {
            id: f.string(0)?,
            user_id: f.string(1)?,
            meal_type: MealType::from_stored(&f.string(2)?),
            items: f
                .objects(3)?
                .iter()
                .map(meal_item_from_fields)
                .collect::<Result<_, _>>()?,
            logged_at: read_datetime(f, 4)?,
            notes: f.opt_string(5)?,
            image_url: f.opt_string(6)?,
            created_at: read_datetime(f, 7)?,
            updated_at: read_datetime(f, 8)?,
        })
    }
}

// --- Efficiency ---

fn task_to_fields(t: &TaskRecord) -> Fields {
    let mut f = Fields::new()
        .with(0, t.id.as_str())
        .with(1, t.title.as_str())
        .with(2, t.priority.as_str())
        .with(3, t.is_completed);
    if let Some(at) = t.completed_at {
        f = f.with(4, millis(at));
    }
    f
}

fn task_from_fields(f: &Fields) -> Result<TaskRecord, CodecError> {
    Ok(TaskRecord {
        id: f.string(0)?,
        title: f.string(1)?,
        priority: Priority::from_stored(&f.string(2)?),
        is_completed: f.bool(3)?,
        completed_at: read_opt_datetime(f, 4)?,
    })
}

fn routine_to_fields(r: &RoutineRecord) -> Fields {
    Fields::new()
        .with(0, r.id.as_str())
        .with(1, r.title.as_str())
        .with(2, r.is_completed)
}

fn routine_from_fields(f: &Fields) -> Result<RoutineRecord, CodecError> {
    Ok(RoutineRecord {
        id: f.string(0)?,
        title: f.string(1)?,
        is_completed: f.bool(2)?,
    })
}

fn goal_to_fields(g: &GoalRecord) -> Fields {
    Fields::new()
        .with(0, g.id.as_str())
        .with(1, g.title.as_str())
        .with(2, g.progress)
}

fn goal_from_fields(f: &Fields) -> Result<GoalRecord, CodecError> {
    Ok(GoalRecord {
        id: f.string(0)?,
        title: f.string(1)?,
        progress: f.double(2)?,
    })
}

impl Record for EfficiencySnapshot {
    const KIND: DataKind = DataKind::Efficiency;
    const TYPE_ID: u8 = 3;
    const NUMERIC_FIELDS: &'static [&'static str] = &[
        "completed_tasks",
        "total_tasks",
        "completed_pomodoros",
        "total_focus_minutes",
        "efficiency_score",
    ];

    fn key(&self) -> String {
        composite_key(&self.user_id, self.date)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn numeric_values(&self) -> Vec<f64> {
        vec![
            as_f64(self.completed_tasks),
            as_f64(self.total_tasks),
            as_f64(self.completed_pomodoros),
            as_f64(self.total_focus_minutes),
            self.efficiency_score,
        ]
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with(0, self.id.as_str())
            .with(1, self.user_id.as_str())
            .with(2, date_to_millis(self.date))
            .with(3, self.tasks.iter().map(task_to_fields).collect::<Vec<_>>())
            .with(
                4,
                self.routines
                    .iter()
                    .map(routine_to_fields)
                    .collect::<Vec<_>>(),
            )
            .with(5, self.goals.iter().map(goal_to_fields).collect::<Vec<_>>())
            .with(6, self.completed_tasks)
            .with(7, self.total_tasks)
            .with(8, self.completed_pomodoros)
            .with(9, self.total_focus_minutes)
            .with(10, self.efficiency_score)
            .with(11, millis(self.created_at))
            .with(12, millis(self.updated_at))
    }

    fn from_fields(f: &Fields) -> Result<Self, CodecError> {
        Ok(Self {
            id: f.string(0)?,
            user_id: f.string(1)?,
            date: read_date(f, 2)?,
            tasks: f
                .objects(3)?
                .iter()
                .map(task_from_fields)
                .collect::<Result<_, _>>()?,
            routines: f
                .objects(4)?
                .iter()
                .map(routine_from_fields)
                .collect::<Result<_, _>>()?,
            goals: f
                .objects(5)?
                .iter()
                .map(goal_from_fields)
                .collect::<Result<_, _>>()?,
            completed_tasks: f.int(6)?,
            total_tasks: f.int(7)?,
            completed_pomodoros: f.int(8)?,
            total_focus_minutes: f.int(9)?,
            efficiency_score: f.double(10)?,
            created_at: read_datetime(f, 11)?,
            updated_at: read_datetime(f, 12)?,
        })
    }
}

impl DailyRecord for EfficiencySnapshot {
    type Patch = EfficiencyFields;

    fn blank(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self::new(user_id, date, now)
    }

    fn apply(&mut self, patch: &EfficiencyFields) {
        if let Some(tasks) = &patch.tasks {
            self.tasks.clone_from(tasks);
            self.total_tasks = count(tasks.len());
            self.completed_tasks = count(tasks.iter().filter(|t| t.is_completed).count());
        }
        if let Some(routines) = &patch.routines {
            self.routines.clone_from(routines);
        }
        if let Some(goals) = &patch.goals {
            self.goals.clone_from(goals);
        }
        // Explicit counters win over the ones derived from the task list.
        if let Some(v) = patch.completed_tasks {
            self.completed_tasks = v;
        }
        if let Some(v) = patch.total_tasks {
            self.total_tasks = v;
        }
        if let Some(v) = patch.completed_pomodoros {
            self.completed_pomodoros = v;
        }
        if let Some(v) = patch.total_focus_minutes {
            self.total_focus_minutes = v;
        }
        if let Some(v) = patch.efficiency_score {
            self.efficiency_score = v;
        }
    }

    fn set_updated_at(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

// --- Steps ---

impl Record for StepSnapshot {
    const KIND: DataKind = DataKind::Steps;
    const TYPE_ID: u8 = 4;
    const NUMERIC_FIELDS: &'static [&'static str] = &["steps", "distance_km", "calories"];

    fn key(&self) -> String {
        composite_key(&self.user_id, self.date)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn numeric_values(&self) -> Vec<f64> {
        vec![as_f64(self.steps), self.distance_km, self.calories]
    }

    fn to_fields(&self) -> Fields {
        Fields::new()
            .with(0, self.id.as_str())
            .with(1, self.user_id.as_str())
            .with(2, date_to_millis(self.date))
            .with(3, self.steps)
            .with(4, self.distance_km)
            .with(5, self.calories)
            .with(6, self.status.as_str())
            .with(7, self.user_height_cm)
            .with(8, self.user_weight_kg)
            .with(9, millis(self.created_at))
            .with(10, millis(self.updated_at))
    }

    fn from_fields(f: &Fields) -> Result<Self, CodecError> {
        Ok(Self {
            id: f.string(0)?,
            user_id: f.string(1)?,
            date: read_date(f, 2)?,
            steps: f.int(3)?,
            distance_km: f.double(4)?,
            calories: f.double(5)?,
            status: f.string(6)?,
            user_height_cm: f.double(7)?,
            user_weight_kg: f.double(8)?,
            created_at: read_datetime(f, 9)?,
            updated_at: read_datetime(f, 10)?,
        })
    }
}

impl DailyRecord for StepSnapshot {
    type Patch = StepFields;

    fn blank(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self::new(user_id, date, now)
    }

    fn apply(&mut self, patch: &StepFields) {
        if let Some(v) = patch.steps {
            self.steps = v;
        }
        if let Some(v) = &patch.status {
            self.status.clone_from(v);
        }
        if let Some(v) = patch.user_height_cm {
            self.user_height_cm = v;
        }
        if let Some(v) = patch.user_weight_kg {
            self.user_weight_kg = v;
        }
        let derive = patch.steps.is_some()
            || patch.user_height_cm.is_some()
            || patch.user_weight_kg.is_some();
        match patch.distance_km {
            Some(v) => self.distance_km = v,
            None if derive => self.distance_km = self.derived_distance_km(),
            None => {}
        }
        match patch.calories {
            Some(v) => self.calories = v,
            None if derive => self.calories = self.derived_calories(),
            None => {}
        }
    }

    fn set_updated_at(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
