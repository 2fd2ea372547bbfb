use crate::domain::date_key::DateKey;
use crate::domain::models::{DayKind, DayRecord};
use crate::infrastructure::error::EngineError;
use crate::infrastructure::key_value_store::KeyValueStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;

pub const STORAGE_KEY: &str = "workout_calendar_days";
const DEFAULT_RETENTION_DAYS: i64 = 60;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Counts of what a history merge actually did. Re-running the same merge
/// converts every `inserted` into a `skipped_existing`; the store state is
/// unchanged either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub skipped_today: usize,
    pub skipped_existing: usize,
    pub skipped_expired: usize,
    pub skipped_invalid: usize,
}

/// Sole writer of the durable day mapping.
///
/// The whole mapping is one JSON blob under [`STORAGE_KEY`]. Entries older
/// than the retention window are dropped lazily on read and removed from
/// persistence on the next write. Only today's entry can be deleted by
/// direct action; everything else is finalized history.
pub struct CalendarStore<K: KeyValueStore> {
    store: Arc<K>,
    timezone: Tz,
    retention_days: i64,
    now_provider: NowProvider,
}

impl<K: KeyValueStore> CalendarStore<K> {
    pub fn new(store: Arc<K>, timezone: Tz) -> Self {
        Self {
            store,
            timezone,
            retention_days: DEFAULT_RETENTION_DAYS,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.retention_days = retention_days;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn today(&self) -> NaiveDate {
        (self.now_provider)().with_timezone(&self.timezone).date_naive()
    }

    pub fn today_key(&self) -> DateKey {
        DateKey::from_date(self.today())
    }

    fn retention_cutoff(&self) -> NaiveDate {
        self.today() - Duration::days(self.retention_days)
    }

    /// All entries within the retention window.
    pub async fn all(&self) -> Result<HashMap<DateKey, DayRecord>, EngineError> {
        Ok(self.prune(self.load().await?))
    }

    pub async fn has(&self, key: &DateKey) -> Result<bool, EngineError> {
        Ok(self.all().await?.contains_key(key))
    }

    /// Create or replace today's record. The write must surface failures:
    /// a completion that did not persist cannot look successful.
    pub async fn set_today(&self, kind: DayKind) -> Result<DayRecord, EngineError> {
        let now = (self.now_provider)();
        let record = DayRecord::new(kind, now.to_rfc3339());

        let mut days = self.prune(self.load().await?);
        days.insert(self.today_key(), record.clone());
        self.persist(&days).await?;
        Ok(record)
    }

    /// Remove today's record. Removal is keyed on `today_key()` computed at
    /// call time, so any non-today entry is structurally untouchable here.
    /// Returns whether an entry was removed.
    pub async fn unset_today(&self) -> Result<bool, EngineError> {
        let mut days = self.prune(self.load().await?);
        let removed = days.remove(&self.today_key()).is_some();
        if removed {
            self.persist(&days).await?;
        }
        Ok(removed)
    }

    /// Insert-if-absent bulk merge for backfilled history, one
    /// read-modify-write cycle. Today's key is skipped unconditionally and
    /// existing history is never overwritten.
    pub async fn merge_history(
        &self,
        entries: Vec<(DateKey, DayRecord)>,
    ) -> Result<MergeOutcome, EngineError> {
        let mut outcome = MergeOutcome::default();
        let mut days = self.prune(self.load().await?);
        let today = self.today_key();
        let cutoff = self.retention_cutoff();
        let mut changed = false;

        for (key, record) in entries {
            if key == today {
                outcome.skipped_today += 1;
                continue;
            }
            if days.contains_key(&key) {
                outcome.skipped_existing += 1;
                continue;
            }
            if key.to_date().is_none_or(|date| date < cutoff) {
                outcome.skipped_expired += 1;
                continue;
            }
            days.insert(key, record);
            outcome.inserted += 1;
            changed = true;
        }

        if changed {
            self.persist(&days).await?;
        }
        Ok(outcome)
    }

    async fn load(&self) -> Result<HashMap<DateKey, DayRecord>, EngineError> {
        let Some(raw) = self.store.get(STORAGE_KEY).await? else {
            return Ok(HashMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(days) => Ok(days),
            Err(error) => {
                // An unreadable blob is unrecoverable; starting over beats
                // blocking every completion behind a parse error.
                tracing::warn!(%error, "discarding unreadable calendar blob");
                Ok(HashMap::new())
            }
        }
    }

    async fn persist(&self, days: &HashMap<DateKey, DayRecord>) -> Result<(), EngineError> {
        let raw = serde_json::to_string(days)?;
        self.store.set(STORAGE_KEY, &raw).await
    }

    fn prune(&self, days: HashMap<DateKey, DayRecord>) -> HashMap<DateKey, DayRecord> {
        let cutoff = self.retention_cutoff();
        let before = days.len();
        let retained: HashMap<DateKey, DayRecord> = days
            .into_iter()
            .filter(|(key, _)| key.to_date().is_some_and(|date| date >= cutoff))
            .collect();
        let dropped = before - retained.len();
        if dropped > 0 {
            tracing::debug!(dropped, "pruned entries outside retention window");
        }
        retained
    }
}
