mod data;
mod helpers;
mod meal;
mod record;
mod summary;

pub(crate) use data::{
    cmd_clear, cmd_export, cmd_import, cmd_profile_set, cmd_profile_show, cmd_status,
};
pub(crate) use meal::{NewMeal, cmd_meal_delete, cmd_meal_list, cmd_meal_log};
pub(crate) use record::{cmd_efficiency, cmd_health, cmd_steps, cmd_task_add, cmd_task_done};
pub(crate) use summary::{Window, cmd_history, cmd_summary};
