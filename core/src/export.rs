use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::models::{DailyHealthRecord, HealthFields, MealRecord};

const HEALTH_HEADER: [&str; 10] = [
    "date",
    "sleep_hours",
    "steps",
    "calories_in",
    "calories_out",
    "net_calories",
    "tasks_done",
    "goal_progress",
    "efficiency_score",
    "health_score",
];

/// Write one CSV row per health record, header first.
pub fn write_health_csv<W: Write>(records: &[DailyHealthRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEALTH_HEADER)
        .context("Failed to write CSV header")?;
    for r in records {
        wtr.write_record([
            r.date.format("%Y-%m-%d").to_string(),
            r.sleep_hours.to_string(),
            r.steps.to_string(),
            r.calories_in.to_string(),
            r.calories_out.to_string(),
            r.net_calories().to_string(),
            r.tasks_done.to_string(),
            r.goal_progress.to_string(),
            r.efficiency_score.to_string(),
            r.health_score.to_string(),
        ])
        .with_context(|| format!("Failed to write row for {}", r.date))?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Write one CSV row per meal item, with the meal's time and type repeated.
pub fn write_meals_csv<W: Write>(meals: &[MealRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "logged_at",
        "meal_type",
        "food_name",
        "portion",
        "calories",
        "protein",
        "carbs",
        "fat",
    ])
    .context("Failed to write CSV header")?;
    for meal in meals {
        for item in &meal.items {
            let total = item.total();
            wtr.write_record([
                meal.logged_at.to_rfc3339(),
                meal.meal_type.as_str().to_string(),
                item.food_name.clone(),
                item.portion.to_string(),
                total.calories.to_string(),
                total.protein.to_string(),
                total.carbs.to_string(),
                total.fat.to_string(),
            ])
            .with_context(|| format!("Failed to write meal {}", meal.id))?;
        }
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Parse health rows from CSV into per-day patches.
///
/// Only `date` is required. Empty or missing columns leave the field untouched;
/// `net_calories` is derived and ignored. Dates may be `YYYY-MM-DD` or `M/D/YYYY`.
pub fn parse_health_csv<R: Read>(reader: R) -> Result<Vec<(NaiveDate, HealthFields)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let Some(idx_date) = col("date") else {
        bail!("Missing required column: date");
    };

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;
        let raw_date = record.get(idx_date).unwrap_or("");
        if raw_date.is_empty() {
            continue;
        }
        let row = line_num + 2;
        let date = parse_date(raw_date).with_context(|| format!("Bad date on CSV row {row}"))?;

        let cell = |name: &str| {
            col(name)
                .and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
        };
        let float = |name: &str| -> Result<Option<f64>> {
            cell(name)
                .map(|v| {
                    v.parse::<f64>()
                        .with_context(|| format!("Bad {name} '{v}' on CSV row {row}"))
                })
                .transpose()
        };
        let int = |name: &str| -> Result<Option<i64>> {
            cell(name)
                .map(|v| {
                    v.parse::<i64>()
                        .with_context(|| format!("Bad {name} '{v}' on CSV row {row}"))
                })
                .transpose()
        };

        rows.push((
            date,
            HealthFields {
                sleep_hours: float("sleep_hours")?,
                steps: int("steps")?,
                calories_in: float("calories_in")?,
                calories_out: float("calories_out")?,
                tasks_done: int("tasks_done")?,
                goal_progress: float("goal_progress")?,
                efficiency_score: float("efficiency_score")?,
                health_score: float("health_score")?,
            },
        ));
    }
    Ok(rows)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .with_context(|| format!("Cannot parse date: '{s}'"))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{MealItem, MealType, NutritionInfo};

    #[test]
    fn test_write_health_csv() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).unwrap();
        let mut r = DailyHealthRecord::new("u1", NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(), now);
        r.steps = 8000;
        r.calories_in = 2200.0;
        r.calories_out = 2500.0;

        let mut out = Vec::new();
        write_health_csv(&[r], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), HEALTH_HEADER.join(","));
        assert_eq!(lines.next().unwrap(), "2024-06-15,0,8000,2200,2500,-300,0,0,0,0");
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_write_meals_csv_one_row_per_item() {
        let at = Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 0).unwrap();
        let mut meal = MealRecord::new("u1", MealType::Lunch, at);
        let food = |name: &str, cal: f64| {
            MealItem::manual(
                name,
                NutritionInfo {
                    calories: cal,
                    ..NutritionInfo::default()
                },
                2.0,
            )
        };
        meal.items = vec![food("Toast", 100.0), food("Egg, boiled", 70.0)];

        let mut out = Vec::new();
        write_meals_csv(&[meal], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("lunch,Toast,2,200"));
        assert!(lines[2].contains("\"Egg, boiled\",2,140"));
    }

    #[test]
    fn test_parse_health_csv() {
        let csv = "Date,Steps,Sleep_Hours,Calories_In\n\
                   2024-06-15,8000,7.5,\n\
                   ,1,1,1\n\
                   6/16/2024,,8,1900\n";
        let rows = parse_health_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        let (date, patch) = &rows[0];
        assert_eq!(*date, NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
        assert_eq!(patch.steps, Some(8000));
        assert_eq!(patch.sleep_hours, Some(7.5));
        assert_eq!(patch.calories_in, None);
        assert_eq!(patch.health_score, None);

        let (date, patch) = &rows[1];
        assert_eq!(*date, NaiveDate::from_ymd_opt(2024, 6, 16).unwrap());
        assert_eq!(patch.steps, None);
        assert_eq!(patch.calories_in, Some(1900.0));
    }

    #[test]
    fn test_parse_health_csv_requires_date() {
        let err = parse_health_csv("steps\n100\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("date"));

        let err = parse_health_csv("date,steps\nyesterday,100\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_parse_health_csv_rejects_bad_numbers() {
        let err = parse_health_csv("date,steps\n2024-06-15,100\n2024-06-16,\"8,000\"\n".as_bytes())
            .unwrap_err();
        assert_eq!(err.to_string(), "Bad steps '8,000' on CSV row 3");

        let err = parse_health_csv("date,sleep_hours\n2024-06-15,abc\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("sleep_hours 'abc'"));
    }
}
