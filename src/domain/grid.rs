use crate::domain::date_key::DateKey;
use crate::domain::models::{DayRecord, DisplayCell, TodayOverride};
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;

pub const GRID_DAYS: i64 = 28;

/// Expand the day mapping into the fixed 28-cell display window.
///
/// The window ends on the Saturday of today's Sunday-Saturday week, so the
/// last row of a 4x7 rendering is always the current week and every column
/// lines up with a real weekday.
pub fn project_grid(
    days: &HashMap<DateKey, DayRecord>,
    today: NaiveDate,
    live_override: Option<TodayOverride>,
) -> Vec<DisplayCell> {
    let to_saturday = 6 - i64::from(today.weekday().num_days_from_sunday());
    let window_end = today + Duration::days(to_saturday);
    let window_start = window_end - Duration::days(GRID_DAYS - 1);

    (0..GRID_DAYS)
        .map(|offset| {
            let date = window_start + Duration::days(offset);
            let key = DateKey::from_date(date);
            let record = days.get(&key);
            let is_today = date == today;

            let (mut is_rest_day, mut is_free_rest_day) = match record {
                Some(record) => (record.is_rest_day, record.is_free_rest()),
                None => (false, false),
            };
            if is_today {
                if let Some(live) = live_override {
                    is_rest_day = live.is_rest_day;
                    is_free_rest_day = live.is_free_rest_day;
                }
            }

            DisplayCell {
                has_workout: record.is_some(),
                is_rest_day,
                is_free_rest_day,
                is_today,
                is_future: date > today,
                day_of_month: date.day(),
                day_of_week: weekday_index(date),
                date_key: key,
            }
        })
        .collect()
}

fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}
