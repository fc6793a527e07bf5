use chrono::{Local, NaiveDate};
use habitkeep_core::models::{HabitUpdate, NewHabit};

use crate::app::App;
use crate::commands::common::{format_habit_lines, local_midday, normalize_name};
use crate::error::CliError;

pub struct HabitFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub clear_description: bool,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub frequency: Option<u8>,
}

impl HabitFields {
    pub fn into_update(self) -> HabitUpdate {
        let description = if self.clear_description {
            Some(None)
        } else {
            self.description.map(Some)
        };
        HabitUpdate {
            name: self.name,
            description,
            color: self.color,
            icon: self.icon,
            target_frequency: self.frequency,
        }
    }
}

pub async fn run_add(app: &App, name_parts: &[String], fields: HabitFields) -> Result<(), CliError> {
    let input = NewHabit {
        name: normalize_name(name_parts)?,
        description: fields.description,
        color: fields.color,
        icon: fields.icon,
        target_frequency: fields.frequency,
    };
    let habit = app.habits.create_habit(input).await?;
    println!("{}", habit.id);
    Ok(())
}

pub async fn run_list(app: &App, as_json: bool) -> Result<(), CliError> {
    let habits = app.habits.habits_with_stats().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&habits)?);
    } else if habits.is_empty() {
        println!("No habits yet. Add one with `habitkeep add <name>`.");
    } else {
        for line in format_habit_lines(&habits) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_edit(app: &App, id: &str, fields: HabitFields) -> Result<(), CliError> {
    let update = fields.into_update();
    if update.is_empty() {
        return Err(CliError::EmptyUpdate);
    }
    let id = app.habits.resolve_habit_id(id).await?;
    let habit = app.habits.update_habit(&id, &update).await?;
    println!("{}", habit.id);
    Ok(())
}

pub async fn run_delete(app: &App, id: &str) -> Result<(), CliError> {
    let id = app.habits.resolve_habit_id(id).await?;
    app.habits.delete_habit(&id).await?;
    println!("{id}");
    Ok(())
}

pub async fn run_done(app: &App, id: &str, date: Option<NaiveDate>) -> Result<(), CliError> {
    let id = app.habits.resolve_habit_id(id).await?;
    let habit = app.habits.get_habit(&id).await?;
    app.habits
        .complete_habit(&id, date.map(local_midday))
        .await?;

    let day = date.unwrap_or_else(|| Local::now().date_naive());
    let streak = app.habits.habit_streak(&id).await?;
    println!("Completed {} on {day} (streak: {streak}d)", habit.name);
    Ok(())
}

pub async fn run_undo(app: &App, id: &str, date: Option<NaiveDate>) -> Result<(), CliError> {
    let id = app.habits.resolve_habit_id(id).await?;
    let habit = app.habits.get_habit(&id).await?;
    app.habits.uncomplete_habit(&id, date).await?;

    let day = date.unwrap_or_else(|| Local::now().date_naive());
    println!("Cleared {} on {day}", habit.name);
    Ok(())
}
