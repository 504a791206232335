use anyhow::{Result, bail};
use chrono::Utc;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use daybook_core::SyncFacade;
use daybook_core::models::{MealItem, MealRecord, NutritionInfo};

use super::helpers::{check, no_neg_zero, parse_date, parse_meal_type, settle, truncate};

pub(crate) struct NewMeal {
    pub food: String,
    pub calories: f64,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub portion: f64,
    pub meal: String,
    pub notes: Option<String>,
}

pub(crate) async fn cmd_meal_log(
    svc: &SyncFacade,
    user: &str,
    new: NewMeal,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if new.calories < 0.0 {
        bail!("Calories cannot be negative");
    }
    if new.portion <= 0.0 {
        bail!("Portion must be greater than 0");
    }
    let meal_type = parse_meal_type(&new.meal)?;
    let date = parse_date(date)?;
    let logged_at = date.and_time(Utc::now().time()).and_utc();

    let nutrition = NutritionInfo {
        calories: new.calories,
        protein: new.protein.unwrap_or(0.0),
        carbs: new.carbs.unwrap_or(0.0),
        fat: new.fat.unwrap_or(0.0),
        ..NutritionInfo::default()
    };
    let mut meal = MealRecord::new(user, meal_type, logged_at);
    meal.items.push(MealItem::manual(&new.food, nutrition, new.portion));
    meal.notes = new.notes;

    let saved = svc.save_meal(meal).await;
    let saved = settle(svc, saved)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
    } else {
        let totals = saved.totals();
        println!(
            "Logged {} ({}) on {}: {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
            new.food,
            saved.meal_type.as_str(),
            date.format("%Y-%m-%d"),
            totals.calories,
            totals.protein,
            totals.carbs,
            totals.fat
        );
        println!("  ID: {}", saved.id);
    }
    Ok(())
}

pub(crate) async fn cmd_meal_list(
    svc: &SyncFacade,
    user: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct MealRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Food")]
        food: String,
        #[tabled(rename = "Portion")]
        portion: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let date = parse_date(date)?;
    let meals = svc.get_meals_for_day(user, date).await;
    let meals = settle(svc, meals)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
        return Ok(());
    }
    if meals.is_empty() {
        eprintln!("No meals for {}", date.format("%Y-%m-%d"));
        return Ok(());
    }

    let rows: Vec<MealRow> = meals
        .iter()
        .flat_map(|m| {
            m.items.iter().map(move |item| {
                let total = item.total();
                MealRow {
                    id: m.id.chars().take(8).collect(),
                    time: m.logged_at.format("%H:%M").to_string(),
                    meal: m.meal_type.as_str().to_string(),
                    food: truncate(&item.food_name, 30),
                    portion: format!("{}", item.portion),
                    calories: format!("{:.0}", no_neg_zero(total.calories)),
                    protein: format!("{:.0}g", no_neg_zero(total.protein)),
                    carbs: format!("{:.0}g", no_neg_zero(total.carbs)),
                    fat: format!("{:.0}g", no_neg_zero(total.fat)),
                }
            })
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    let total = meals
        .iter()
        .fold(NutritionInfo::default(), |acc, m| acc + m.totals());
    println!(
        "  TOTAL: {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        no_neg_zero(total.calories),
        no_neg_zero(total.protein),
        no_neg_zero(total.carbs),
        no_neg_zero(total.fat)
    );
    Ok(())
}

/// Delete by full id or by the 8-character prefix shown in `meal list`.
pub(crate) async fn cmd_meal_delete(
    svc: &SyncFacade,
    user: &str,
    id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let id = id.trim();
    if id.is_empty() {
        bail!("Meal id cannot be empty");
    }
    let full_id = if id.len() < 36 {
        let date = parse_date(date)?;
        let meals = svc.get_meals_for_day(user, date).await;
        let matches: Vec<String> = settle(svc, meals)?
            .into_iter()
            .filter(|m| m.id.starts_with(id))
            .map(|m| m.id)
            .collect();
        match matches.as_slice() {
            [one] => one.clone(),
            [] => bail!("No meal with id '{id}' on {date}"),
            _ => bail!("Meal id '{id}' is ambiguous"),
        }
    } else {
        id.to_string()
    };

    let deleted = svc.delete_meal(user, &full_id).await;
    check(svc)?;
    if !deleted {
        bail!("Meal {full_id} not found");
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": full_id }));
    } else {
        println!("Deleted meal {full_id}");
    }
    Ok(())
}
