use crate::application::backfill;
use crate::domain::date_key::DateKey;
use crate::domain::grid::project_grid;
use crate::domain::models::{
    DayKind, DayRecord, DisplayCell, RemoteSession, StreakStats, TodayOverride,
};
use crate::domain::streaks::compute_stats;
use crate::infrastructure::calendar_store::CalendarStore;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::key_value_store::KeyValueStore;
use crate::infrastructure::session_source::WorkoutSessionSource;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    LocalReady,
    Reconciled,
}

impl EnginePhase {
    fn from_repr(repr: u8) -> Self {
        match repr {
            1 => Self::LocalReady,
            2 => Self::Reconciled,
            _ => Self::Uninitialized,
        }
    }

    fn repr(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::LocalReady => 1,
            Self::Reconciled => 2,
        }
    }
}

/// One refresh pass: the grid and the stats derived from the same read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSnapshot {
    pub cells: Vec<DisplayCell>,
    pub stats: StreakStats,
}

/// Orchestrator for the user's own history: local store first, one-shot
/// remote backfill per mount, guards scoped to this instance.
///
/// Reads are fail-open: a storage read error renders as an empty history so
/// the view is always available. Writes surface their failures.
pub struct OwnProfileEngine<K: KeyValueStore, S: WorkoutSessionSource> {
    store: CalendarStore<K>,
    sessions: Arc<S>,
    user_id: String,
    phase: AtomicU8,
    backfilled: AtomicBool,
    refresh_in_flight: AtomicBool,
    mounted: Arc<AtomicBool>,
}

impl<K: KeyValueStore, S: WorkoutSessionSource> OwnProfileEngine<K, S> {
    pub fn new(store: CalendarStore<K>, sessions: Arc<S>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            sessions,
            user_id: user_id.into(),
            phase: AtomicU8::new(EnginePhase::Uninitialized.repr()),
            backfilled: AtomicBool::new(false),
            refresh_in_flight: AtomicBool::new(false),
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn phase(&self) -> EnginePhase {
        EnginePhase::from_repr(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: EnginePhase) {
        self.phase.store(phase.repr(), Ordering::SeqCst);
    }

    pub fn store(&self) -> &CalendarStore<K> {
        &self.store
    }

    /// First activation for a mount: local-only fast path, always available.
    pub async fn activate(&self, today: NaiveDate) -> CalendarSnapshot {
        let snapshot = self.snapshot(today, None).await;
        if self.phase() == EnginePhase::Uninitialized {
            self.set_phase(EnginePhase::LocalReady);
        }
        snapshot
    }

    /// Fire the one-shot backfill for this mount, pulling sessions from the
    /// remote source. Returns the post-merge snapshot, or `None` when the
    /// backfill already ran, failed, or arrived after unmount. Failure is
    /// terminal for the mount: the guard stays tripped, local data stands.
    pub async fn ensure_backfilled(&self, today: NaiveDate) -> Option<CalendarSnapshot> {
        if self.backfilled.swap(true, Ordering::SeqCst) {
            return None;
        }
        let sessions = match self.sessions.completed_sessions(&self.user_id).await {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(%error, user_id = %self.user_id, "backfill failed, keeping local history");
                return None;
            }
        };
        self.apply_backfill(&sessions, today).await
    }

    /// Merge a caller-provided session batch under the same one-shot guard.
    pub async fn trigger_backfill(
        &self,
        sessions: &[RemoteSession],
        today: NaiveDate,
    ) -> Option<CalendarSnapshot> {
        if self.backfilled.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.apply_backfill(sessions, today).await
    }

    async fn apply_backfill(
        &self,
        sessions: &[RemoteSession],
        today: NaiveDate,
    ) -> Option<CalendarSnapshot> {
        // The fetch may outlive the view; a result that lands after unmount
        // must not mutate the store.
        if !self.mounted.load(Ordering::SeqCst) {
            tracing::debug!("discarding backfill result after unmount");
            return None;
        }
        match backfill::merge(&self.store, sessions).await {
            Ok(_) => {
                self.set_phase(EnginePhase::Reconciled);
                Some(self.snapshot(today, None).await)
            }
            Err(error) => {
                tracing::warn!(%error, "backfill merge failed, keeping local history");
                None
            }
        }
    }

    /// Local-only recomputation. Overlapping requests collapse: a request
    /// arriving while one is in flight is dropped and returns `None`.
    pub async fn refresh(&self, today: NaiveDate) -> Option<CalendarSnapshot> {
        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("refresh already in flight, dropping request");
            return None;
        }
        // The flag must clear even if this future is dropped mid-await, or
        // every later refresh for the mount would collapse.
        let _reset = InFlightReset(&self.refresh_in_flight);
        Some(self.snapshot(today, None).await)
    }

    pub async fn display_grid(
        &self,
        today: NaiveDate,
        live_override: Option<TodayOverride>,
    ) -> Vec<DisplayCell> {
        project_grid(&self.read_days().await, today, live_override)
    }

    pub async fn stats(&self, today: NaiveDate) -> StreakStats {
        compute_stats(&self.read_days().await, today)
    }

    pub async fn mark_today_completed(&self, is_rest_day: bool) -> Result<DayRecord, EngineError> {
        let kind = if is_rest_day { DayKind::Rest } else { DayKind::Workout };
        self.store.set_today(kind).await
    }

    pub async fn mark_today_free_rest(&self) -> Result<DayRecord, EngineError> {
        self.store.set_today(DayKind::FreeRest).await
    }

    pub async fn unmark_today_completed(&self) -> Result<bool, EngineError> {
        self.store.unset_today().await
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    async fn snapshot(&self, today: NaiveDate, live_override: Option<TodayOverride>) -> CalendarSnapshot {
        let days = self.read_days().await;
        CalendarSnapshot {
            cells: project_grid(&days, today, live_override),
            stats: compute_stats(&days, today),
        }
    }

    async fn read_days(&self) -> HashMap<DateKey, DayRecord> {
        match self.store.all().await {
            Ok(days) => days,
            Err(error) => {
                tracing::warn!(%error, "calendar read failed, rendering empty history");
                HashMap::new()
            }
        }
    }
}

struct InFlightReset<'a>(&'a AtomicBool);

impl Drop for InFlightReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrator for viewing another user's history. The backend is
/// authoritative and exclusive here: the local store and backfill path are
/// never consulted, and a remote failure is an error rather than a fallback.
pub struct ViewerEngine<S: WorkoutSessionSource> {
    sessions: Arc<S>,
    user_id: String,
    timezone: Tz,
    days: Mutex<Option<HashMap<DateKey, DayRecord>>>,
}

impl<S: WorkoutSessionSource> ViewerEngine<S> {
    pub fn new(sessions: Arc<S>, user_id: impl Into<String>, timezone: Tz) -> Self {
        Self {
            sessions,
            user_id: user_id.into(),
            timezone,
            days: Mutex::new(None),
        }
    }

    pub async fn display_grid(&self, today: NaiveDate) -> Result<Vec<DisplayCell>, EngineError> {
        Ok(project_grid(&self.days().await?, today, None))
    }

    pub async fn stats(&self, today: NaiveDate) -> Result<StreakStats, EngineError> {
        Ok(compute_stats(&self.days().await?, today))
    }

    /// Fetch once per mount; later calls reuse the mapping.
    async fn days(&self) -> Result<HashMap<DateKey, DayRecord>, EngineError> {
        {
            let cached = self.lock_days()?;
            if let Some(days) = cached.as_ref() {
                return Ok(days.clone());
            }
        }

        let sessions = self.sessions.completed_sessions(&self.user_id).await?;
        let (days, skipped_invalid) = backfill::sessions_to_days(&sessions, self.timezone);
        if skipped_invalid > 0 {
            tracing::debug!(skipped_invalid, "ignored remote sessions without usable completedAt");
        }

        let mut cached = self.lock_days()?;
        *cached = Some(days.clone());
        Ok(days)
    }

    fn lock_days(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Option<HashMap<DateKey, DayRecord>>>, EngineError> {
        self.days
            .lock()
            .map_err(|error| EngineError::Storage(format!("viewer cache lock poisoned: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::calendar_store::NowProvider;
    use crate::infrastructure::key_value_store::InMemoryKeyValueStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicUsize;

    struct FakeSessionSource {
        sessions: Vec<RemoteSession>,
        fail: bool,
        calls: AtomicUsize,
        unmount_on_fetch: Option<Arc<AtomicBool>>,
    }

    impl FakeSessionSource {
        fn with_sessions(sessions: Vec<RemoteSession>) -> Self {
            Self {
                sessions,
                fail: false,
                calls: AtomicUsize::new(0),
                unmount_on_fetch: None,
            }
        }

        fn failing() -> Self {
            Self {
                sessions: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
                unmount_on_fetch: None,
            }
        }
    }

    #[async_trait]
    impl WorkoutSessionSource for FakeSessionSource {
        async fn completed_sessions(&self, _user_id: &str) -> Result<Vec<RemoteSession>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(mounted) = &self.unmount_on_fetch {
                mounted.store(false, Ordering::SeqCst);
            }
            if self.fail {
                return Err(EngineError::Remote("history service unavailable".to_string()));
            }
            Ok(self.sessions.clone())
        }
    }

    struct OfflineKeyValueStore;

    #[async_trait]
    impl KeyValueStore for OfflineKeyValueStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, EngineError> {
            Err(EngineError::Storage("backing store offline".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), EngineError> {
            Err(EngineError::Storage("backing store offline".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), EngineError> {
            Err(EngineError::Storage("backing store offline".to_string()))
        }
    }

    /// Suspends once per read so a caller can observe a refresh mid-await.
    #[derive(Default)]
    struct YieldingKeyValueStore {
        backing: InMemoryKeyValueStore,
    }

    #[async_trait]
    impl KeyValueStore for YieldingKeyValueStore {
        async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
            tokio::task::yield_now().await;
            self.backing.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
            self.backing.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), EngineError> {
            self.backing.remove(key).await
        }
    }

    fn poll_once<F: std::future::Future>(future: std::pin::Pin<&mut F>) -> std::task::Poll<F::Output> {
        let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
        future.poll(&mut cx)
    }

    fn fixed_now(value: &str) -> NowProvider {
        let instant = DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc);
        Arc::new(move || instant)
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn workout_session(completed_at: &str) -> RemoteSession {
        RemoteSession {
            completed_at: Some(completed_at.to_string()),
            session_type: Some("strength".to_string()),
            exercises: vec![serde_json::json!({"name": "bench"})],
            day_name: Some("Push Day".to_string()),
        }
    }

    fn rest_session(completed_at: &str) -> RemoteSession {
        RemoteSession {
            completed_at: Some(completed_at.to_string()),
            session_type: Some("rest_day".to_string()),
            exercises: Vec::new(),
            day_name: Some("Rest Day".to_string()),
        }
    }

    fn engine_with(
        sessions: FakeSessionSource,
        now: &str,
    ) -> OwnProfileEngine<InMemoryKeyValueStore, FakeSessionSource> {
        let store = CalendarStore::new(Arc::new(InMemoryKeyValueStore::default()), chrono_tz::UTC)
            .with_now_provider(fixed_now(now));
        OwnProfileEngine::new(store, Arc::new(sessions), "athlete-1")
    }

    #[tokio::test]
    async fn activate_serves_empty_history_immediately() {
        let engine = engine_with(FakeSessionSource::with_sessions(Vec::new()), "2026-02-16T09:00:00Z");
        assert_eq!(engine.phase(), EnginePhase::Uninitialized);

        let snapshot = engine.activate(date("2026-02-16")).await;
        assert_eq!(engine.phase(), EnginePhase::LocalReady);
        assert_eq!(snapshot.cells.len(), 28);
        assert!(snapshot.cells.iter().all(|cell| !cell.has_workout));
        assert_eq!(snapshot.stats, StreakStats::default());
    }

    #[tokio::test]
    async fn backfill_runs_once_and_reconciles() {
        let source = FakeSessionSource::with_sessions(vec![
            workout_session("2026-02-14T08:00:00Z"),
            rest_session("2026-02-15T08:00:00Z"),
        ]);
        let engine = engine_with(source, "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");

        engine.activate(today).await;
        let snapshot = engine.ensure_backfilled(today).await.expect("first backfill");
        assert_eq!(engine.phase(), EnginePhase::Reconciled);
        assert_eq!(snapshot.stats.total_workouts, 1);
        // Rest yesterday keeps the streak alive with nothing logged today.
        assert_eq!(snapshot.stats.current_streak, 1);

        assert!(engine.ensure_backfilled(today).await.is_none());
        assert_eq!(engine.sessions.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_failure_keeps_local_view_and_never_retries() {
        let engine = engine_with(FakeSessionSource::failing(), "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");

        engine.activate(today).await;
        engine.mark_today_completed(false).await.expect("mark today");

        assert!(engine.ensure_backfilled(today).await.is_none());
        assert_eq!(engine.phase(), EnginePhase::LocalReady);

        // Guard stays tripped; the source is not consulted again.
        assert!(engine.ensure_backfilled(today).await.is_none());
        assert_eq!(engine.sessions.calls.load(Ordering::SeqCst), 1);

        // The local-only path still works.
        let stats = engine.stats(today).await;
        assert_eq!(stats.total_workouts, 1);
    }

    #[tokio::test]
    async fn backfill_after_unmount_leaves_store_untouched() {
        // The fake flips the shared mount flag while the fetch is
        // outstanding, as if the view unmounted mid-request.
        let flag = Arc::new(AtomicBool::new(true));
        let mut source =
            FakeSessionSource::with_sessions(vec![workout_session("2026-02-14T08:00:00Z")]);
        source.unmount_on_fetch = Some(Arc::clone(&flag));

        let store = CalendarStore::new(Arc::new(InMemoryKeyValueStore::default()), chrono_tz::UTC)
            .with_now_provider(fixed_now("2026-02-16T09:00:00Z"));
        let mut engine = OwnProfileEngine::new(store, Arc::new(source), "athlete-1");
        engine.mounted = flag;

        let today = date("2026-02-16");
        engine.activate(today).await;

        assert!(engine.ensure_backfilled(today).await.is_none());
        assert!(engine.store().all().await.expect("all").is_empty());
    }

    #[tokio::test]
    async fn trigger_backfill_honors_one_shot_guard() {
        let engine = engine_with(FakeSessionSource::with_sessions(Vec::new()), "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");
        engine.activate(today).await;

        let batch = vec![workout_session("2026-02-14T08:00:00Z")];
        assert!(engine.trigger_backfill(&batch, today).await.is_some());
        assert!(engine.trigger_backfill(&batch, today).await.is_none());
    }

    #[tokio::test]
    async fn read_failure_renders_empty_history() {
        let store = CalendarStore::new(Arc::new(OfflineKeyValueStore), chrono_tz::UTC)
            .with_now_provider(fixed_now("2026-02-16T09:00:00Z"));
        let engine = OwnProfileEngine::new(
            store,
            Arc::new(FakeSessionSource::with_sessions(Vec::new())),
            "athlete-1",
        );
        let today = date("2026-02-16");

        // The store itself refuses the read; the engine still renders.
        let snapshot = engine.activate(today).await;
        assert_eq!(engine.phase(), EnginePhase::LocalReady);
        assert_eq!(snapshot.cells.len(), 28);
        assert!(snapshot.cells.iter().all(|cell| !cell.has_workout));
        assert_eq!(snapshot.stats, StreakStats::default());

        assert_eq!(engine.stats(today).await, StreakStats::default());
        assert_eq!(engine.display_grid(today, None).await.len(), 28);
    }

    #[tokio::test]
    async fn refresh_recovers_after_dropped_request() {
        let store = CalendarStore::new(Arc::new(YieldingKeyValueStore::default()), chrono_tz::UTC)
            .with_now_provider(fixed_now("2026-02-16T09:00:00Z"));
        let engine = OwnProfileEngine::new(
            store,
            Arc::new(FakeSessionSource::with_sessions(Vec::new())),
            "athlete-1",
        );
        let today = date("2026-02-16");

        // Drop a refresh while its store read is suspended.
        {
            let mut abandoned = Box::pin(engine.refresh(today));
            assert!(poll_once(abandoned.as_mut()).is_pending());
        }

        // The in-flight flag must not stay wedged for the mount.
        assert!(engine.refresh(today).await.is_some());
    }

    #[tokio::test]
    async fn refresh_collapses_overlapping_requests() {
        let engine = engine_with(FakeSessionSource::with_sessions(Vec::new()), "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");
        engine.activate(today).await;

        engine.refresh_in_flight.store(true, Ordering::SeqCst);
        assert!(engine.refresh(today).await.is_none());

        engine.refresh_in_flight.store(false, Ordering::SeqCst);
        assert!(engine.refresh(today).await.is_some());
    }

    #[tokio::test]
    async fn completion_flow_updates_stats_and_grid() {
        let engine = engine_with(FakeSessionSource::with_sessions(Vec::new()), "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");
        engine.activate(today).await;

        engine.mark_today_completed(false).await.expect("mark workout");
        let stats = engine.stats(today).await;
        assert_eq!(stats.total_workouts, 1);
        assert_eq!(stats.current_streak, 1);

        let cells = engine.display_grid(today, None).await;
        let today_cell = cells.iter().find(|cell| cell.is_today).expect("today cell");
        assert!(today_cell.has_workout);

        engine.unmark_today_completed().await.expect("unmark");
        let stats = engine.stats(today).await;
        assert_eq!(stats, StreakStats::default());
    }

    #[tokio::test]
    async fn live_override_shows_uncommitted_rest_state() {
        let engine = engine_with(FakeSessionSource::with_sessions(Vec::new()), "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");
        engine.mark_today_completed(false).await.expect("mark workout");

        let live = TodayOverride {
            is_rest_day: true,
            is_free_rest_day: false,
        };
        let cells = engine.display_grid(today, Some(live)).await;
        let today_cell = cells.iter().find(|cell| cell.is_today).expect("today cell");
        assert!(today_cell.is_rest_day);
    }

    #[tokio::test]
    async fn e2e_three_workouts_and_a_rest_day() {
        let source = FakeSessionSource::with_sessions(vec![
            rest_session("2026-02-13T08:00:00Z"),
            workout_session("2026-02-14T08:00:00Z"),
            workout_session("2026-02-15T08:00:00Z"),
        ]);
        let engine = engine_with(source, "2026-02-16T09:00:00Z");
        let today = date("2026-02-16");

        engine.activate(today).await;
        engine.mark_today_completed(false).await.expect("mark today");
        let snapshot = engine.ensure_backfilled(today).await.expect("backfill");

        assert_eq!(snapshot.stats.total_workouts, 3);
        assert_eq!(snapshot.stats.current_streak, 3);
        assert_eq!(snapshot.stats.longest_streak, 3);
    }

    #[tokio::test]
    async fn viewer_mode_reads_backend_exclusively() {
        let source = Arc::new(FakeSessionSource::with_sessions(vec![workout_session(
            "2026-02-10T08:00:00Z",
        )]));
        let viewer = ViewerEngine::new(Arc::clone(&source), "athlete-2", chrono_tz::UTC);
        let today = date("2026-02-16");

        let stats = viewer.stats(today).await.expect("stats");
        assert_eq!(stats.total_workouts, 1);
        // Last remote activity is six days old: no current streak.
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 1);

        let cells = viewer.display_grid(today).await.expect("grid");
        assert_eq!(cells.len(), 28);
        assert!(
            cells
                .iter()
                .any(|cell| cell.date_key.as_str() == "2026-02-10" && cell.has_workout)
        );

        // One fetch per mount; later reads reuse the mapping.
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn viewer_mode_surfaces_remote_failure() {
        let viewer = ViewerEngine::new(
            Arc::new(FakeSessionSource::failing()),
            "athlete-2",
            chrono_tz::UTC,
        );
        assert!(matches!(
            viewer.stats(date("2026-02-16")).await,
            Err(EngineError::Remote(_))
        ));
    }
}
