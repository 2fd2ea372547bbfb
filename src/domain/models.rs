use crate::domain::date_key::DateKey;
use serde::{Deserialize, Serialize};

/// How "today" was completed. `FreeRest` is the dedicated free-rest
/// affordance: it counts as a rest day for streak math and additionally
/// carries the cosmetic `isFreeRestDay` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    Workout,
    Rest,
    FreeRest,
}

impl DayKind {
    pub fn is_rest(self) -> bool {
        matches!(self, Self::Rest | Self::FreeRest)
    }

    pub fn is_free_rest(self) -> bool {
        matches!(self, Self::FreeRest)
    }
}

/// Persisted activity status for one calendar day. Field names match the
/// on-device JSON blob shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    pub completed: bool,
    pub is_rest_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_free_rest_day: Option<bool>,
    pub timestamp: String,
}

impl DayRecord {
    pub fn new(kind: DayKind, timestamp: String) -> Self {
        Self {
            completed: true,
            is_rest_day: kind.is_rest(),
            is_free_rest_day: kind.is_free_rest().then_some(true),
            timestamp,
        }
    }

    pub fn is_free_rest(&self) -> bool {
        self.is_free_rest_day.unwrap_or(false)
    }
}

/// One completed session as reported by the backend history query.
/// `completed_at` stays a raw string so one unparseable record can be
/// skipped without failing the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default, rename = "type")]
    pub session_type: Option<String>,
    #[serde(default)]
    pub exercises: Vec<serde_json::Value>,
    #[serde(default)]
    pub day_name: Option<String>,
}

impl RemoteSession {
    pub fn is_rest(&self) -> bool {
        if self.session_type.as_deref() == Some("rest_day") {
            return true;
        }
        self.exercises.is_empty() && self.day_name.as_deref() == Some("Rest Day")
    }
}

/// In-progress state for today that has not been persisted yet. Takes
/// precedence over the stored rest flags on today's grid cell only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodayOverride {
    pub is_rest_day: bool,
    pub is_free_rest_day: bool,
}

/// One position of the 28-day display grid. Ephemeral; recomputed on every
/// display request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayCell {
    pub date_key: DateKey,
    pub has_workout: bool,
    pub is_rest_day: bool,
    pub is_free_rest_day: bool,
    pub is_today: bool,
    pub is_future: bool,
    pub day_of_month: u32,
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
}

/// Derived totals; recomputed from the full store on every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStats {
    pub total_workouts: u32,
    pub longest_streak: u32,
    pub current_streak: u32,
}
