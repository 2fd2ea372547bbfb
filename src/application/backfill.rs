use crate::domain::date_key::DateKey;
use crate::domain::models::{DayKind, DayRecord, RemoteSession};
use crate::infrastructure::calendar_store::{CalendarStore, MergeOutcome};
use crate::infrastructure::error::EngineError;
use crate::infrastructure::key_value_store::KeyValueStore;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;

/// Classify one remote session as a (key, record) pair. `None` when the
/// session has no usable `completedAt`; callers skip it and keep going.
pub fn session_day(session: &RemoteSession, timezone: Tz) -> Option<(DateKey, DayRecord)> {
    let raw = session.completed_at.as_deref()?;
    let completed_at = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
    let key = DateKey::from_instant(completed_at, timezone);
    let kind = if session.is_rest() {
        DayKind::Rest
    } else {
        DayKind::Workout
    };
    Some((key, DayRecord::new(kind, raw.to_string())))
}

/// Ephemeral day mapping for a session list, first session per day wins.
/// Used for viewing another user's history; never persisted. Returns the
/// mapping and the count of sessions skipped for bad timestamps.
pub fn sessions_to_days(
    sessions: &[RemoteSession],
    timezone: Tz,
) -> (HashMap<DateKey, DayRecord>, usize) {
    let mut days = HashMap::new();
    let mut skipped_invalid = 0;
    for session in sessions {
        match session_day(session, timezone) {
            Some((key, record)) => {
                days.entry(key).or_insert(record);
            }
            None => skipped_invalid += 1,
        }
    }
    (days, skipped_invalid)
}

/// Merge authoritative remote history into the local store, additive only.
/// Idempotent; the store enforces the today-guard and first-writer-wins.
pub async fn merge<K: KeyValueStore>(
    store: &CalendarStore<K>,
    sessions: &[RemoteSession],
) -> Result<MergeOutcome, EngineError> {
    let timezone = store.timezone();
    let mut entries = Vec::with_capacity(sessions.len());
    let mut skipped_invalid = 0;

    for session in sessions {
        match session_day(session, timezone) {
            Some(entry) => entries.push(entry),
            None => {
                skipped_invalid += 1;
                tracing::debug!("skipping remote session without usable completedAt");
            }
        }
    }

    let mut outcome = store.merge_history(entries).await?;
    outcome.skipped_invalid = skipped_invalid;
    tracing::info!(
        inserted = outcome.inserted,
        skipped_today = outcome.skipped_today,
        skipped_existing = outcome.skipped_existing,
        skipped_expired = outcome.skipped_expired,
        skipped_invalid = outcome.skipped_invalid,
        "merged remote workout history"
    );
    Ok(outcome)
}
