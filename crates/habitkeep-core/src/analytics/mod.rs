//! Streak and completion-rate computation.
//!
//! Everything here is a pure function of completion records, a time zone and
//! "now", so callers decide what local time means and tests can pin the
//! calendar.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::models::{Habit, HabitCompletion};

/// Trailing window, in days, of the completion rate
pub const COMPLETION_RATE_WINDOW_DAYS: i64 = 30;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Local calendar day of a Unix-ms timestamp
pub fn local_day<Tz: TimeZone>(millis: i64, tz: &Tz) -> NaiveDate {
    let utc = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH);
    utc.with_timezone(tz).date_naive()
}

/// Unix-ms of the first instant of `day` in `tz`
///
/// When local midnight does not exist (DST gap) the first representable hour
/// is used instead.
pub fn start_of_day<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> i64 {
    let midnight = day.and_time(NaiveTime::MIN);
    (0..3)
        .find_map(|hour| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(hour)))
                .earliest()
        })
        .map_or_else(
            || midnight.and_utc().timestamp_millis(),
            |start| start.timestamp_millis(),
        )
}

/// Half-open `[start, end)` Unix-ms window covering `day` in `tz`
pub fn day_window<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> (i64, i64) {
    let start = start_of_day(day, tz);
    let end = day
        .checked_add_days(Days::new(1))
        .map_or(start + DAY_MILLIS, |next| start_of_day(next, tz));
    (start, end)
}

fn active_days<'a, Tz: TimeZone>(
    completions: impl IntoIterator<Item = &'a HabitCompletion>,
    tz: &Tz,
) -> BTreeSet<NaiveDate> {
    completions
        .into_iter()
        .filter(|completion| !completion.is_deleted())
        .map(|completion| local_day(completion.completed_at, tz))
        .collect()
}

/// Consecutive days with a completion, walking back from `today`
///
/// A day without a completion ends the walk, today included, so a habit not
/// yet done today has a streak of 0.
pub fn current_streak<Tz: TimeZone>(
    completions: &[HabitCompletion],
    today: NaiveDate,
    tz: &Tz,
) -> u32 {
    let days = active_days(completions, tz);
    let mut streak = 0;
    let mut day = Some(today);
    while let Some(current) = day {
        if !days.contains(&current) {
            break;
        }
        streak += 1;
        day = current.pred_opt();
    }
    streak
}

/// Longest run of consecutive completed days anywhere in history
pub fn longest_streak<Tz: TimeZone>(completions: &[HabitCompletion], tz: &Tz) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;

    for day in active_days(completions, tz) {
        run = match previous.and_then(|prev| prev.succ_opt()) {
            Some(expected) if expected == day => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(day);
    }
    longest
}

/// Percentage of the trailing 30 days, counted as active completions at or
/// after `now - 30 days` over a fixed denominator of 30
pub fn completion_rate(completions: &[HabitCompletion], now_millis: i64) -> f64 {
    let since = now_millis - COMPLETION_RATE_WINDOW_DAYS * DAY_MILLIS;
    let recent = completions
        .iter()
        .filter(|completion| !completion.is_deleted() && completion.completed_at >= since)
        .count();

    #[allow(clippy::cast_precision_loss)]
    let rate = recent as f64 / COMPLETION_RATE_WINDOW_DAYS as f64 * 100.0;
    rate
}

/// Whether an active completion falls on `day`
pub fn is_completed_on<Tz: TimeZone>(
    completions: &[HabitCompletion],
    day: NaiveDate,
    tz: &Tz,
) -> bool {
    let (start, end) = day_window(day, tz);
    completions.iter().any(|completion| {
        !completion.is_deleted() && completion.completed_at >= start && completion.completed_at < end
    })
}

/// Derived statistics for one habit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HabitStats {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub completion_rate: f64,
    pub completed_today: bool,
    pub total_completions: usize,
}

impl HabitStats {
    pub fn compute<Tz: TimeZone>(completions: &[HabitCompletion], now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();
        Self {
            current_streak: current_streak(completions, today, &tz),
            longest_streak: longest_streak(completions, &tz),
            completion_rate: completion_rate(completions, now.timestamp_millis()),
            completed_today: is_completed_on(completions, today, &tz),
            total_completions: completions.iter().filter(|c| !c.is_deleted()).count(),
        }
    }
}

/// A habit together with its derived statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitWithStats {
    #[serde(flatten)]
    pub habit: Habit,
    #[serde(flatten)]
    pub stats: HabitStats,
}
