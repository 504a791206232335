use std::ops::Add;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Data kinds and keys ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Health,
    Meal,
    Efficiency,
    Steps,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [
        DataKind::Health,
        DataKind::Meal,
        DataKind::Efficiency,
        DataKind::Steps,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Health => "health",
            DataKind::Meal => "meal",
            DataKind::Efficiency => "efficiency",
            DataKind::Steps => "steps",
        }
    }

    /// Name of the local partition holding records of this kind.
    #[must_use]
    pub fn partition(self) -> &'static str {
        match self {
            DataKind::Health => "health_data",
            DataKind::Meal => "meal_data",
            DataKind::Efficiency => "efficiency_data",
            DataKind::Steps => "step_data",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "health" => Some(DataKind::Health),
            "meal" | "meals" => Some(DataKind::Meal),
            "efficiency" => Some(DataKind::Efficiency),
            "steps" | "step" => Some(DataKind::Steps),
            _ => None,
        }
    }

    /// Key of the freshness marker for this kind and user.
    #[must_use]
    pub fn marker_key(self, user_id: &str) -> String {
        format!("{}_{user_id}", self.as_str())
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milliseconds since the epoch of UTC midnight on `date`.
#[must_use]
pub fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

#[must_use]
pub fn millis_to_date(millis: i64) -> Option<NaiveDate> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.date_naive())
}

/// `{user_id}_{epoch millis of the day}`, the address of one user's day.
#[must_use]
pub fn composite_key(user_id: &str, date: NaiveDate) -> String {
    format!("{user_id}_{}", date_to_millis(date))
}

// --- Enum-like fields ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    #[default]
    Snack,
}

pub const MEAL_TYPES: &[MealType] = &[
    MealType::Breakfast,
    MealType::Lunch,
    MealType::Dinner,
    MealType::Snack,
];

impl MealType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        MEAL_TYPES
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Lenient decoding for stored values: unknown strings fall back to the default.
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionMethod {
    Barcode,
    Vision,
    #[default]
    Manual,
}

impl RecognitionMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecognitionMethod::Barcode => "barcode",
            RecognitionMethod::Vision => "vision",
            RecognitionMethod::Manual => "manual",
        }
    }

    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "barcode" => RecognitionMethod::Barcode,
            "vision" => RecognitionMethod::Vision,
            _ => RecognitionMethod::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

// --- Daily health ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHealthRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub sleep_hours: f64,
    pub steps: i64,
    pub calories_in: f64,
    pub calories_out: f64,
    pub tasks_done: i64,
    pub goal_progress: f64,
    pub efficiency_score: f64,
    pub health_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyHealthRecord {
    #[must_use]
    pub fn new(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            date,
            sleep_hours: 0.0,
            steps: 0,
            calories_in: 0.0,
            calories_out: 0.0,
            tasks_done: 0,
            goal_progress: 0.0,
            efficiency_score: 0.0,
            health_score: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn net_calories(&self) -> f64 {
        self.calories_in - self.calories_out
    }
}

/// Partial update of a [`DailyHealthRecord`]. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthFields {
    pub sleep_hours: Option<f64>,
    pub steps: Option<i64>,
    pub calories_in: Option<f64>,
    pub calories_out: Option<f64>,
    pub tasks_done: Option<i64>,
    pub goal_progress: Option<f64>,
    pub efficiency_score: Option<f64>,
    pub health_score: Option<f64>,
}

// --- Meals ---

/// Nutrition of one portion of a food.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionInfo {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
}

impl NutritionInfo {
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            protein: self.protein * factor,
            carbs: self.carbs * factor,
            fat: self.fat * factor,
            fiber: self.fiber * factor,
            sugar: self.sugar * factor,
            sodium: self.sodium * factor,
        }
    }
}

impl Add for NutritionInfo {
    type Output = NutritionInfo;

    fn add(self, rhs: Self) -> Self {
        Self {
            calories: self.calories + rhs.calories,
            protein: self.protein + rhs.protein,
            carbs: self.carbs + rhs.carbs,
            fat: self.fat + rhs.fat,
            fiber: self.fiber + rhs.fiber,
            sugar: self.sugar + rhs.sugar,
            sodium: self.sodium + rhs.sodium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub food_name: String,
    pub nutrition: NutritionInfo,
    /// Multiplier applied to `nutrition`; 1.0 is one portion.
    pub portion: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub recognition: RecognitionMethod,
}

impl MealItem {
    #[must_use]
    pub fn manual(food_name: &str, nutrition: NutritionInfo, portion: f64) -> Self {
        Self {
            food_name: food_name.to_string(),
            nutrition,
            portion,
            barcode: None,
            image_url: None,
            recognition: RecognitionMethod::Manual,
        }
    }

    #[must_use]
    pub fn total(&self) -> NutritionInfo {
        self.nutrition.scaled(self.portion)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealRecord {
    pub id: String,
    pub user_id: String,
    pub meal_type: MealType,
    pub items: Vec<MealItem>,
    pub logged_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MealRecord {
    /// A new meal with a fresh id. Timestamps are restamped when the meal is saved.
    #[must_use]
    pub fn new(user_id: &str, meal_type: MealType, logged_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            meal_type,
            items: Vec::new(),
            logged_at,
            notes: None,
            image_url: None,
            created_at: logged_at,
            updated_at: logged_at,
        }
    }

    #[must_use]
    pub fn totals(&self) -> NutritionInfo {
        self.items
            .iter()
            .map(MealItem::total)
            .fold(NutritionInfo::default(), |acc, n| acc + n)
    }
}

// --- Efficiency ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    #[must_use]
    pub fn new(title: &str, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            priority,
            is_completed: false,
            completed_at: None,
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.is_completed = true;
        self.completed_at = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineRecord {
    pub id: String,
    pub title: String,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: String,
    pub title: String,
    /// 0.0 to 1.0
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencySnapshot {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub tasks: Vec<TaskRecord>,
    pub routines: Vec<RoutineRecord>,
    pub goals: Vec<GoalRecord>,
    pub completed_tasks: i64,
    pub total_tasks: i64,
    pub completed_pomodoros: i64,
    pub total_focus_minutes: i64,
    pub efficiency_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EfficiencySnapshot {
    #[must_use]
    pub fn new(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: composite_key(user_id, date),
            user_id: user_id.to_string(),
            date,
            tasks: Vec::new(),
            routines: Vec::new(),
            goals: Vec::new(),
            completed_tasks: 0,
            total_tasks: 0,
            completed_pomodoros: 0,
            total_focus_minutes: 0,
            efficiency_score: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion_rate(&self) -> f64 {
        if self.total_tasks <= 0 {
            return 0.0;
        }
        self.completed_tasks as f64 / self.total_tasks as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyFields {
    pub tasks: Option<Vec<TaskRecord>>,
    pub routines: Option<Vec<RoutineRecord>>,
    pub goals: Option<Vec<GoalRecord>>,
    pub completed_tasks: Option<i64>,
    pub total_tasks: Option<i64>,
    pub completed_pomodoros: Option<i64>,
    pub total_focus_minutes: Option<i64>,
    pub efficiency_score: Option<f64>,
}

// --- Steps ---

const STRIDE_HEIGHT_RATIO: f64 = 0.415;
const DEFAULT_STRIDE_M: f64 = 0.75;
const DEFAULT_WEIGHT_KG: f64 = 70.0;
const KCAL_PER_KG_KM: f64 = 1.036;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: i64,
    pub distance_km: f64,
    pub calories: f64,
    pub status: String,
    pub user_height_cm: f64,
    pub user_weight_kg: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepSnapshot {
    #[must_use]
    pub fn new(user_id: &str, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: composite_key(user_id, date),
            user_id: user_id.to_string(),
            date,
            steps: 0,
            distance_km: 0.0,
            calories: 0.0,
            status: String::new(),
            user_height_cm: 0.0,
            user_weight_kg: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn stride_m(&self) -> f64 {
        if self.user_height_cm > 0.0 {
            self.user_height_cm * STRIDE_HEIGHT_RATIO / 100.0
        } else {
            DEFAULT_STRIDE_M
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn derived_distance_km(&self) -> f64 {
        self.steps as f64 * self.stride_m() / 1000.0
    }

    #[must_use]
    pub fn derived_calories(&self) -> f64 {
        let weight = if self.user_weight_kg > 0.0 {
            self.user_weight_kg
        } else {
            DEFAULT_WEIGHT_KG
        };
        self.derived_distance_km() * weight * KCAL_PER_KG_KM
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepFields {
    pub steps: Option<i64>,
    /// Overrides the distance derived from steps and height.
    pub distance_km: Option<f64>,
    /// Overrides the calories derived from distance and weight.
    pub calories: Option<f64>,
    pub status: Option<String>,
    pub user_height_cm: Option<f64>,
    pub user_weight_kg: Option<f64>,
}

// --- Aggregates ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStat {
    pub name: &'static str,
    pub total: f64,
    pub average: f64,
}

/// Count, totals and means of every numeric field of one kind over a date window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub kind: DataKind,
    pub user_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub count: usize,
    pub fields: Vec<FieldStat>,
}

impl Summary {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldStat> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn total(&self, name: &str) -> f64 {
        self.field(name).map_or(0.0, |f| f.total)
    }

    #[must_use]
    pub fn average(&self, name: &str) -> f64 {
        self.field(name).map_or(0.0, |f| f.average)
    }
}

/// What the local store holds of one kind for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindStatus {
    pub kind: DataKind,
    pub records: usize,
    pub last_updated: Option<DateTime<Utc>>,
}
