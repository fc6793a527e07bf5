use habitkeep_core::analytics::HabitWithStats;

use crate::app::App;
use crate::commands::common::{format_rate, format_stats_lines};
use crate::error::CliError;

pub async fn run_stats(app: &App, id: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let Some(raw_id) = id else {
        let habits = app.habits.habits_with_stats().await?;
        if as_json {
            println!("{}", serde_json::to_string_pretty(&habits)?);
        } else {
            for line in format_stats_lines(&habits) {
                println!("{line}");
            }
        }
        return Ok(());
    };

    let id = app.habits.resolve_habit_id(raw_id).await?;
    let entry = HabitWithStats {
        habit: app.habits.get_habit(&id).await?,
        stats: app.habits.habit_stats(&id).await?,
    };
    if as_json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    let stats = &entry.stats;
    println!("{}", entry.habit.name);
    if let Some(description) = &entry.habit.description {
        println!("  {description}");
    }
    println!("  Current streak:   {}d", stats.current_streak);
    println!("  Longest streak:   {}d", stats.longest_streak);
    println!("  30-day rate:      {}", format_rate(stats.completion_rate));
    println!(
        "  Done today:       {}",
        if stats.completed_today { "yes" } else { "no" }
    );
    println!("  Total:            {}", stats.total_completions);
    println!("  Target:           {}x per week", entry.habit.target_frequency);
    Ok(())
}
