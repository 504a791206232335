mod commands;
mod config;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    NewMeal, Window, cmd_clear, cmd_efficiency, cmd_export, cmd_health, cmd_history, cmd_import,
    cmd_meal_delete, cmd_meal_list, cmd_meal_log, cmd_profile_set, cmd_profile_show, cmd_status,
    cmd_steps, cmd_summary, cmd_task_add, cmd_task_done,
};
use crate::config::Config;
use daybook_core::SyncFacade;
use daybook_core::models::{EfficiencyFields, HealthFields, StepFields};

#[derive(Parser)]
#[command(
    name = "daybook",
    version,
    about = "A local-first health and productivity journal"
)]
struct Cli {
    /// User to act as (default: `user_id` from config.toml, or "local")
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record or show daily health values (no values: show the day)
    Health {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Hours slept
        #[arg(long)]
        sleep: Option<f64>,
        /// Step count
        #[arg(long)]
        steps: Option<i64>,
        /// Calories eaten
        #[arg(long)]
        calories_in: Option<f64>,
        /// Calories burned
        #[arg(long)]
        calories_out: Option<f64>,
        /// Tasks completed
        #[arg(long)]
        tasks_done: Option<i64>,
        /// Goal progress (0.0 to 1.0)
        #[arg(long)]
        goal_progress: Option<f64>,
        /// Efficiency score
        #[arg(long)]
        efficiency_score: Option<f64>,
        /// Health score
        #[arg(long)]
        health_score: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record step data; distance and calories are derived unless given
    Steps {
        /// Step count
        count: Option<i64>,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Distance in km (overrides the derived value)
        #[arg(long)]
        distance: Option<f64>,
        /// Calories burned (overrides the derived value)
        #[arg(long)]
        calories: Option<f64>,
        /// Height in cm (default: from profile)
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kg (default: from profile)
        #[arg(long)]
        weight: Option<f64>,
        /// Free-form status, e.g. "walking"
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record focus and efficiency data
    Efficiency {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Completed pomodoros
        #[arg(long)]
        pomodoros: Option<i64>,
        /// Minutes of focused work
        #[arg(long)]
        focus_minutes: Option<i64>,
        /// Efficiency score
        #[arg(long)]
        score: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the day's task list
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Log and list meals
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Show daily records for the last N days
    History {
        /// Kind: health, meal, efficiency, steps
        kind: String,
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Totals and averages for this week, this month or a date range
    Summary {
        /// Kind: health, meal, efficiency, steps
        kind: String,
        /// Monday to Sunday of the current week (default)
        #[arg(long)]
        week: bool,
        /// The current calendar month
        #[arg(long)]
        month: bool,
        /// Range start (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Range end (YYYY-MM-DD, default: today)
        #[arg(long)]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show stored record counts per data kind
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage height and weight used for step calculations
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Delete every record and setting of the user
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export records as CSV
    Export {
        /// Kind: health or meal
        kind: String,
        /// Number of days to export, ending today
        #[arg(short, long, default_value = "30")]
        days: u32,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Import daily health values from CSV
    Import {
        /// Path to the CSV file (needs a `date` column)
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Add a task
    Add {
        /// Task title
        title: String,
        /// Priority: low, medium, high
        #[arg(short, long, default_value = "medium")]
        priority: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a task done, by title or list number
    Done {
        /// Task title or number
        task: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Log a food
    Log {
        /// Food name
        food: String,
        /// Calories per portion
        #[arg(long)]
        calories: f64,
        /// Protein per portion (g)
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs per portion (g)
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat per portion (g)
        #[arg(long)]
        fat: Option<f64>,
        /// Number of portions
        #[arg(long, default_value = "1")]
        portion: f64,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long, default_value = "snack")]
        meal: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Optional notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the meals of a day
    List {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a meal by ID (or the short ID shown by `meal list`)
    Delete {
        /// Meal ID
        id: String,
        /// Day to look the short ID up in (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Set height and/or weight
    Set {
        /// Height in cm
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the saved profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Diagnostics go to stderr, filtered by `DAYBOOK_LOG` (default: warn).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("DAYBOOK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let user = cli.user.unwrap_or_else(|| config.user_id.clone());
    debug!(db = %config.db_path.display(), %user, "starting");

    let svc = SyncFacade::open(&config.db_path).with_stale_after(config.stale_after);
    if !svc.initialize().await {
        let reason = svc.last_error().unwrap_or_default();
        bail!("Failed to open {}: {reason}", config.db_path.display());
    }
    let svc = &svc;
    let user = user.as_str();

    match cli.command {
        Commands::Health {
            date,
            sleep,
            steps,
            calories_in,
            calories_out,
            tasks_done,
            goal_progress,
            efficiency_score,
            health_score,
            json,
        } => {
            let patch = HealthFields {
                sleep_hours: sleep,
                steps,
                calories_in,
                calories_out,
                tasks_done,
                goal_progress,
                efficiency_score,
                health_score,
            };
            cmd_health(svc, user, date, patch, json).await
        }
        Commands::Steps {
            count,
            date,
            distance,
            calories,
            height,
            weight,
            status,
            json,
        } => {
            let patch = StepFields {
                steps: count,
                distance_km: distance,
                calories,
                status,
                user_height_cm: height,
                user_weight_kg: weight,
            };
            cmd_steps(svc, user, date, patch, json).await
        }
        Commands::Efficiency {
            date,
            pomodoros,
            focus_minutes,
            score,
            json,
        } => {
            let patch = EfficiencyFields {
                completed_pomodoros: pomodoros,
                total_focus_minutes: focus_minutes,
                efficiency_score: score,
                ..EfficiencyFields::default()
            };
            cmd_efficiency(svc, user, date, patch, json).await
        }
        Commands::Task { command } => match command {
            TaskCommands::Add {
                title,
                priority,
                date,
                json,
            } => cmd_task_add(svc, user, &title, &priority, date, json).await,
            TaskCommands::Done { task, date, json } => {
                cmd_task_done(svc, user, &task, date, json).await
            }
        },
        Commands::Meal { command } => match command {
            MealCommands::Log {
                food,
                calories,
                protein,
                carbs,
                fat,
                portion,
                meal,
                date,
                notes,
                json,
            } => {
                let new = NewMeal {
                    food,
                    calories,
                    protein,
                    carbs,
                    fat,
                    portion,
                    meal,
                    notes,
                };
                cmd_meal_log(svc, user, new, date, json).await
            }
            MealCommands::List { date, json } => cmd_meal_list(svc, user, date, json).await,
            MealCommands::Delete { id, date, json } => {
                cmd_meal_delete(svc, user, &id, date, json).await
            }
        },
        Commands::History { kind, days, json } => cmd_history(svc, user, &kind, days, json).await,
        Commands::Summary {
            kind,
            week,
            month,
            from,
            to,
            json,
        } => {
            let window = Window::from_args(week, month, from, to)?;
            cmd_summary(svc, user, &kind, window, json).await
        }
        Commands::Status { json } => cmd_status(svc, user, json).await,
        Commands::Profile { command } => match command {
            ProfileCommands::Set {
                height,
                weight,
                json,
            } => cmd_profile_set(svc, user, height, weight, json).await,
            ProfileCommands::Show { json } => cmd_profile_show(svc, user, json).await,
        },
        Commands::Clear { yes, json } => cmd_clear(svc, user, yes, json).await,
        Commands::Export { kind, days, output } => {
            cmd_export(svc, user, &kind, days, output.as_deref()).await
        }
        Commands::Import {
            file,
            dry_run,
            json,
        } => cmd_import(svc, user, &file, dry_run, json).await,
    }
}
