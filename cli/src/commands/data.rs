use anyhow::{Context, Result, bail};
use chrono::Local;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tabled::{Table, Tabled, settings::Style};

use daybook_core::SyncFacade;
use daybook_core::export::{parse_health_csv, write_health_csv, write_meals_csv};
use daybook_core::models::{
    DailyHealthRecord, DataKind, EfficiencySnapshot, MealRecord, StepSnapshot,
};
use daybook_core::sync::UserProfile;

use super::helpers::{check, check_health_patch, confirm, parse_kind, settle};

/// What the local store holds per kind.
pub(crate) async fn cmd_status(svc: &SyncFacade, user: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Records")]
        records: usize,
        #[tabled(rename = "Last updated")]
        last_updated: String,
    }

    let statuses = vec![
        settle(svc, svc.kind_status::<DailyHealthRecord>(user).await)?,
        settle(svc, svc.kind_status::<MealRecord>(user).await)?,
        settle(svc, svc.kind_status::<EfficiencySnapshot>(user).await)?,
        settle(svc, svc.kind_status::<StepSnapshot>(user).await)?,
    ];

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }
    let rows: Vec<StatusRow> = statuses
        .iter()
        .map(|s| StatusRow {
            kind: s.kind.to_string(),
            records: s.records,
            last_updated: s.last_updated.map_or_else(
                || "never".to_string(),
                |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
            ),
        })
        .collect();
    println!("User: {user}");
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) async fn cmd_clear(svc: &SyncFacade, user: &str, yes: bool, json: bool) -> Result<()> {
    if !yes && !confirm(&format!("Delete all records and profile data for '{user}'?"))? {
        bail!("Aborted");
    }
    let removed = svc.clear_user_data(user).await;
    let removed = settle(svc, removed)?;

    if json {
        println!("{}", serde_json::json!({ "user_id": user, "removed": removed }));
    } else {
        println!("Removed {removed} records for {user}");
    }
    Ok(())
}

pub(crate) async fn cmd_export(
    svc: &SyncFacade,
    user: &str,
    kind: &str,
    days: u32,
    output: Option<&Path>,
) -> Result<()> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let end = Local::now().date_naive();
    let start = end - chrono::Duration::days(i64::from(days - 1));

    match parse_kind(kind)? {
        DataKind::Health => {
            let records = svc.get_range::<DailyHealthRecord>(user, start, end).await;
            let records = settle(svc, records)?;
            write_health_csv(&records, open_output(output)?)?;
        }
        DataKind::Meal => {
            let meals = svc.get_range::<MealRecord>(user, start, end).await;
            let meals = settle(svc, meals)?;
            write_meals_csv(&meals, open_output(output)?)?;
        }
        other => bail!("CSV export supports health and meal records, not {other}"),
    }

    if let Some(path) = output {
        eprintln!("Exported {kind} records {start} to {end} to {}", path.display());
    }
    Ok(())
}

fn open_output(output: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    })
}

pub(crate) async fn cmd_import(
    svc: &SyncFacade,
    user: &str,
    file: &Path,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let reader = File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let rows = parse_health_csv(reader)?;
    for (date, patch) in &rows {
        check_health_patch(patch).with_context(|| format!("Invalid values for {date}"))?;
    }

    let mut imported = 0;
    if !dry_run {
        for (date, patch) in &rows {
            let updated = svc.update_health(user, *date, patch).await;
            settle(svc, updated).with_context(|| format!("Failed to import {date}"))?;
            imported += 1;
        }
    }

    if json {
        println!(
            "{}",
            serde_json::json!({ "rows": rows.len(), "imported": imported, "dry_run": dry_run })
        );
    } else if dry_run {
        println!("Would import {} days of health data", rows.len());
    } else {
        println!("Imported {imported} days of health data");
    }
    Ok(())
}

pub(crate) async fn cmd_profile_set(
    svc: &SyncFacade,
    user: &str,
    height_cm: Option<f64>,
    weight_kg: Option<f64>,
    json: bool,
) -> Result<()> {
    if height_cm.is_some_and(|h| h <= 0.0) || weight_kg.is_some_and(|w| w <= 0.0) {
        bail!("Height and weight must be greater than 0");
    }
    let current = svc.load_profile(user).await;
    let current = settle(svc, current)?;
    let profile = UserProfile {
        height_cm: height_cm.or(current.height_cm),
        weight_kg: weight_kg.or(current.weight_kg),
    };
    svc.save_profile(user, profile).await;
    check(svc)?;
    print_profile(user, profile, json)
}

pub(crate) async fn cmd_profile_show(svc: &SyncFacade, user: &str, json: bool) -> Result<()> {
    let profile = svc.load_profile(user).await;
    print_profile(user, settle(svc, profile)?, json)
}

fn print_profile(user: &str, profile: UserProfile, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "user_id": user,
                "height_cm": profile.height_cm,
                "weight_kg": profile.weight_kg,
            })
        );
        return Ok(());
    }
    let show = |v: Option<f64>, unit: &str| {
        v.map_or_else(|| "not set".to_string(), |v| format!("{v:.1} {unit}"))
    };
    println!("User:   {user}");
    println!("Height: {}", show(profile.height_cm, "cm"));
    println!("Weight: {}", show(profile.weight_kg, "kg"));
    Ok(())
}
