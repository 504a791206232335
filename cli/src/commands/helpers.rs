use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDate};
use std::io::{self, BufRead, Write};
use tabled::{
    builder::Builder,
    settings::{Alignment, Modify, Style, object::Columns},
};

use daybook_core::SyncFacade;
use daybook_core::models::{DataKind, HealthFields, MealType, Summary};
use daybook_core::record::Record;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

pub(crate) fn parse_kind(s: &str) -> Result<DataKind> {
    DataKind::parse(s)
        .with_context(|| format!("Unknown data kind '{s}'. Use health, meal, efficiency or steps"))
}

pub(crate) fn parse_meal_type(s: &str) -> Result<MealType> {
    MealType::parse(s)
        .with_context(|| format!("Invalid meal type '{s}'. Use breakfast, lunch, dinner or snack"))
}

/// Turn a facade result into an error carrying the facade's last error.
pub(crate) fn settle<T>(svc: &SyncFacade, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| {
        anyhow!(
            svc.last_error()
                .unwrap_or_else(|| "operation failed".to_string())
        )
    })
}

/// For calls that report failure as `false`: only a recorded error is fatal.
pub(crate) fn check(svc: &SyncFacade) -> Result<()> {
    match svc.last_error() {
        Some(e) => bail!(e),
        None => Ok(()),
    }
}

/// Reject values no day can have. The store itself accepts anything.
pub(crate) fn check_health_patch(patch: &HealthFields) -> Result<()> {
    if patch.steps.is_some_and(|v| v < 0) {
        bail!("Step count cannot be negative");
    }
    if patch.calories_in.is_some_and(|v| v < 0.0) || patch.calories_out.is_some_and(|v| v < 0.0) {
        bail!("Calories cannot be negative");
    }
    if patch.sleep_hours.is_some_and(|v| v < 0.0) || patch.tasks_done.is_some_and(|v| v < 0) {
        bail!("Sleep hours and tasks done cannot be negative");
    }
    Ok(())
}

pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// One row per record: the date, then every numeric field.
pub(crate) fn print_records_table<R: Record>(records: &[R]) {
    let mut builder = Builder::default();
    let mut header = vec!["Date".to_string()];
    header.extend(R::NUMERIC_FIELDS.iter().map(|f| column_title(f)));
    builder.push_record(header);

    for r in records {
        let mut row = vec![r.date().format("%Y-%m-%d").to_string()];
        row.extend(r.numeric_values().into_iter().map(format_number));
        builder.push_record(row);
    }

    let table = builder
        .build()
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_summary(summary: &Summary) {
    println!(
        "=== {} {} to {} ({} records) ===\n",
        summary.kind, summary.start, summary.end, summary.count
    );

    let mut builder = Builder::default();
    builder.push_record(["Field", "Total", "Average"]);
    for f in &summary.fields {
        builder.push_record([
            column_title(f.name),
            format_number(f.total),
            format_number(f.average),
        ]);
    }
    let table = builder
        .build()
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

/// `calories_in` -> `Calories in`
pub(crate) fn column_title(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) fn format_number(v: f64) -> String {
    let v = no_neg_zero(v);
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
