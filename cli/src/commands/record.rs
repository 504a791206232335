use anyhow::{Result, bail};
use chrono::Utc;

use daybook_core::SyncFacade;
use daybook_core::models::{
    DailyHealthRecord, EfficiencyFields, EfficiencySnapshot, HealthFields, Priority, StepFields,
    StepSnapshot, TaskRecord,
};

use super::helpers::{check_health_patch, format_number, parse_date, settle, truncate};

pub(crate) async fn cmd_health(
    svc: &SyncFacade,
    user: &str,
    date: Option<String>,
    patch: HealthFields,
    json: bool,
) -> Result<()> {
    check_health_patch(&patch)?;
    let date = parse_date(date)?;
    let record = if patch == HealthFields::default() {
        // nothing to write: show the day, blank if never recorded
        let range = svc
            .get_range::<DailyHealthRecord>(user, date, date)
            .await;
        settle(svc, range)?
            .into_iter()
            .next()
            .unwrap_or_else(|| DailyHealthRecord::new(user, date, Utc::now()))
    } else {
        let updated = svc.update_health(user, date, &patch).await;
        settle(svc, updated)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("=== {} ===\n", record.date.format("%Y-%m-%d"));
    println!("  Sleep:       {} h", format_number(record.sleep_hours));
    println!("  Steps:       {}", record.steps);
    println!(
        "  Calories:    {} in / {} out (net {})",
        format_number(record.calories_in),
        format_number(record.calories_out),
        format_number(record.net_calories())
    );
    println!("  Tasks done:  {}", record.tasks_done);
    println!("  Goals:       {}", format_number(record.goal_progress));
    println!("  Efficiency:  {}", format_number(record.efficiency_score));
    println!("  Health:      {}", format_number(record.health_score));
    Ok(())
}

pub(crate) async fn cmd_steps(
    svc: &SyncFacade,
    user: &str,
    date: Option<String>,
    patch: StepFields,
    json: bool,
) -> Result<()> {
    if patch.steps.is_some_and(|s| s < 0) {
        bail!("Step count cannot be negative");
    }
    let date = parse_date(date)?;
    let updated = svc.update_steps(user, date, &patch).await;
    let snap: StepSnapshot = settle(svc, updated)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snap)?);
    } else {
        println!(
            "{}: {} steps, {:.2} km, {:.0} kcal",
            snap.date.format("%Y-%m-%d"),
            snap.steps,
            snap.distance_km,
            snap.calories
        );
        if !snap.status.is_empty() {
            println!("  Status: {}", snap.status);
        }
    }
    Ok(())
}

pub(crate) async fn cmd_efficiency(
    svc: &SyncFacade,
    user: &str,
    date: Option<String>,
    patch: EfficiencyFields,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let updated = svc.update_efficiency(user, date, &patch).await;
    let snap = settle(svc, updated)?;
    print_efficiency(&snap, json)
}

pub(crate) async fn cmd_task_add(
    svc: &SyncFacade,
    user: &str,
    title: &str,
    priority: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Task title cannot be empty");
    }
    let date = parse_date(date)?;
    let mut tasks = current_tasks(svc, user, date).await?;
    tasks.push(TaskRecord::new(title.trim(), Priority::from_stored(priority)));

    let patch = EfficiencyFields {
        tasks: Some(tasks),
        ..EfficiencyFields::default()
    };
    let updated = svc.update_efficiency(user, date, &patch).await;
    let snap = settle(svc, updated)?;
    print_efficiency(&snap, json)
}

/// Complete the first open task whose title matches, or the task at a 1-based position.
pub(crate) async fn cmd_task_done(
    svc: &SyncFacade,
    user: &str,
    task: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let mut tasks = current_tasks(svc, user, date).await?;

    let idx = match task.parse::<usize>() {
        Ok(n) if (1..=tasks.len()).contains(&n) => n - 1,
        _ => tasks
            .iter()
            .position(|t| !t.is_completed && t.title.eq_ignore_ascii_case(task))
            .ok_or_else(|| anyhow::anyhow!("No open task '{task}' on {date}"))?,
    };
    tasks[idx].complete(Utc::now());

    let patch = EfficiencyFields {
        tasks: Some(tasks),
        ..EfficiencyFields::default()
    };
    let updated = svc.update_efficiency(user, date, &patch).await;
    let snap = settle(svc, updated)?;
    print_efficiency(&snap, json)
}

async fn current_tasks(
    svc: &SyncFacade,
    user: &str,
    date: chrono::NaiveDate,
) -> Result<Vec<TaskRecord>> {
    let existing = svc.get::<EfficiencySnapshot>(user, date).await;
    Ok(settle(svc, existing)?.map(|s| s.tasks).unwrap_or_default())
}

fn print_efficiency(snap: &EfficiencySnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snap)?);
        return Ok(());
    }

    println!(
        "{}: {}/{} tasks ({:.0}%), {} pomodoros, {} focus minutes, score {}",
        snap.date.format("%Y-%m-%d"),
        snap.completed_tasks,
        snap.total_tasks,
        snap.completion_rate() * 100.0,
        snap.completed_pomodoros,
        snap.total_focus_minutes,
        format_number(snap.efficiency_score)
    );
    for (i, t) in snap.tasks.iter().enumerate() {
        let mark = if t.is_completed { "x" } else { " " };
        println!(
            "  {}. [{mark}] {} ({})",
            i + 1,
            truncate(&t.title, 50),
            t.priority.as_str()
        );
    }
    Ok(())
}
