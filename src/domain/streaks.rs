use crate::domain::date_key::DateKey;
use crate::domain::models::{DayRecord, StreakStats};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Derive totals and streaks from the full day mapping.
///
/// Streak continuity counts every recorded day (workout or rest), but only
/// workout days add length. A gap of two or more missing days breaks a
/// streak. The current streak survives with no activity today as long as the
/// most recent record is yesterday or today, so it can coast on rest days.
pub fn compute_stats(days: &HashMap<DateKey, DayRecord>, today: NaiveDate) -> StreakStats {
    let mut dated: Vec<(NaiveDate, &DayRecord)> = days
        .iter()
        .filter_map(|(key, record)| key.to_date().map(|date| (date, record)))
        .collect();
    dated.sort_by_key(|(date, _)| *date);

    let total_workouts = dated.iter().filter(|(_, record)| !record.is_rest_day).count() as u32;

    StreakStats {
        total_workouts,
        longest_streak: longest_streak(&dated),
        current_streak: current_streak(days, &dated, today),
    }
}

fn longest_streak(dated: &[(NaiveDate, &DayRecord)]) -> u32 {
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut previous: Option<NaiveDate> = None;

    for (date, record) in dated {
        if let Some(previous) = previous {
            if (*date - previous).num_days() != 1 {
                longest = longest.max(run);
                run = 0;
            }
        }
        if !record.is_rest_day {
            run += 1;
        }
        previous = Some(*date);
    }

    longest.max(run)
}

fn current_streak(
    days: &HashMap<DateKey, DayRecord>,
    dated: &[(NaiveDate, &DayRecord)],
    today: NaiveDate,
) -> u32 {
    let Some((latest, _)) = dated.last() else {
        return 0;
    };
    if (today - *latest).num_days() >= 2 {
        return 0;
    }

    let mut streak = 0u32;
    let mut cursor = *latest;
    loop {
        let Some(record) = days.get(&DateKey::from_date(cursor)) else {
            break;
        };
        if !record.is_rest_day {
            streak += 1;
        }
        let Some(previous) = cursor.pred_opt() else {
            break;
        };
        cursor = previous;
    }
    streak
}
