use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use daybook_core::SyncFacade;
use daybook_core::models::{
    DailyHealthRecord, DataKind, EfficiencySnapshot, MealRecord, StepSnapshot,
};
use daybook_core::record::Record;

use super::helpers::{parse_date, parse_kind, print_records_table, print_summary, settle};

pub(crate) enum Window {
    Week,
    Month,
    Range(NaiveDate, NaiveDate),
}

impl Window {
    pub(crate) fn from_args(
        week: bool,
        month: bool,
        from: Option<String>,
        to: Option<String>,
    ) -> Result<Self> {
        match (week, month, from.is_some() || to.is_some()) {
            (true, false, false) | (false, false, false) => Ok(Window::Week),
            (false, true, false) => Ok(Window::Month),
            (false, false, true) => {
                let start = parse_date(from)?;
                let end = parse_date(to)?;
                if start > end {
                    bail!("--from {start} is after --to {end}");
                }
                Ok(Window::Range(start, end))
            }
            _ => bail!("Use only one of --week, --month or --from/--to"),
        }
    }
}

pub(crate) async fn cmd_history(
    svc: &SyncFacade,
    user: &str,
    kind: &str,
    days: u32,
    json: bool,
) -> Result<()> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let end = Local::now().date_naive();
    let start = end - chrono::Duration::days(i64::from(days - 1));

    match parse_kind(kind)? {
        DataKind::Health => history::<DailyHealthRecord>(svc, user, start, end, json).await,
        DataKind::Meal => history::<MealRecord>(svc, user, start, end, json).await,
        DataKind::Efficiency => history::<EfficiencySnapshot>(svc, user, start, end, json).await,
        DataKind::Steps => history::<StepSnapshot>(svc, user, start, end, json).await,
    }
}

async fn history<R: Record + Serialize>(
    svc: &SyncFacade,
    user: &str,
    start: NaiveDate,
    end: NaiveDate,
    json: bool,
) -> Result<()> {
    let records = svc.get_range::<R>(user, start, end).await;
    let records = settle(svc, records)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        eprintln!("No {} records between {start} and {end}", R::KIND);
    } else {
        print_records_table(&records);
    }
    Ok(())
}

pub(crate) async fn cmd_summary(
    svc: &SyncFacade,
    user: &str,
    kind: &str,
    window: Window,
    json: bool,
) -> Result<()> {
    match parse_kind(kind)? {
        DataKind::Health => summary::<DailyHealthRecord>(svc, user, window, json).await,
        DataKind::Meal => summary::<MealRecord>(svc, user, window, json).await,
        DataKind::Efficiency => summary::<EfficiencySnapshot>(svc, user, window, json).await,
        DataKind::Steps => summary::<StepSnapshot>(svc, user, window, json).await,
    }
}

async fn summary<R: Record>(svc: &SyncFacade, user: &str, window: Window, json: bool) -> Result<()> {
    let summary = match window {
        Window::Week => svc.get_weekly_summary::<R>(user).await,
        Window::Month => svc.get_monthly_summary::<R>(user).await,
        Window::Range(start, end) => svc.get_summary::<R>(user, start, end).await,
    };
    let summary = settle(svc, summary)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}
