use chrono::{Local, NaiveDate};
use habitkeep_core::analytics::{start_of_day, HabitWithStats};
use habitkeep_core::models::QueueEntry;
use habitkeep_core::sync::SyncReport;
use habitkeep_core::util::millis_to_utc;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;
const HOUR_MS: i64 = 60 * 60 * 1000;

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn normalize_name(parts: &[String]) -> Result<String, CliError> {
    let name = parts.join(" ");
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(CliError::EmptyName);
    }
    Ok(name)
}

/// Midday of a local day, clear of DST transitions at either end
pub fn local_midday(day: NaiveDate) -> chrono::DateTime<chrono::Utc> {
    millis_to_utc(start_of_day(day, &Local) + 12 * HOUR_MS)
}

pub fn format_rate(rate: f64) -> String {
    format!("{rate:.1}%")
}

pub fn format_habit_lines(habits: &[HabitWithStats]) -> Vec<String> {
    habits
        .iter()
        .map(|entry| {
            let mark = if entry.stats.completed_today { "x" } else { " " };
            let name = truncate(&entry.habit.name, 30);
            format!(
                "[{mark}] {:<13}  {name:<30}  {}d streak",
                short_id(&entry.habit.id.as_str()),
                entry.stats.current_streak
            )
        })
        .collect()
}

pub fn format_stats_lines(habits: &[HabitWithStats]) -> Vec<String> {
    habits
        .iter()
        .map(|entry| {
            let stats = &entry.stats;
            format!(
                "{:<30}  current {:>3}d  longest {:>3}d  30-day {:>6}  total {}",
                truncate(&entry.habit.name, 30),
                stats.current_streak,
                stats.longest_streak,
                format_rate(stats.completion_rate),
                stats.total_completions
            )
        })
        .collect()
}

pub fn format_queue_lines(entries: &[QueueEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "#{:<5} {:<7} {:<18} {:<13}  {:<8}",
                entry.id,
                entry.operation,
                entry.table_name,
                short_id(&entry.record_id),
                format_relative_time(entry.created_at, now_ms)
            );
            if entry.retry_count > 0 {
                line.push_str(&format!("  retries={}", entry.retry_count));
            }
            if let Some(error) = &entry.last_error {
                line.push_str(&format!("  last error: {}", truncate(error, 80)));
            }
            line
        })
        .collect()
}

pub fn format_report(report: &SyncReport) -> String {
    let mut summary = format!(
        "Synced {} records ({} pushed, {} pulled)",
        report.synced_records, report.pushed, report.pulled
    );
    if !report.errors.is_empty() {
        summary.push_str(&format!(", {} errors", report.errors.len()));
    }
    summary
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn redact(secret: Option<&str>) -> Option<&'static str> {
    secret.map(|_| "[REDACTED]")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    truncated.push_str("...");
    truncated
}
