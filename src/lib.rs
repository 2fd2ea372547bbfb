//! Local-first workout calendar and streak reconciliation engine.
//!
//! The UI renders from the on-device day mapping immediately; authoritative
//! backend history is merged in once per mount, additively, without ever
//! touching today's in-flight entry.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::backfill;
pub use application::engine::{CalendarSnapshot, EnginePhase, OwnProfileEngine, ViewerEngine};
pub use domain::date_key::DateKey;
pub use domain::grid::{GRID_DAYS, project_grid};
pub use domain::models::{
    DayKind, DayRecord, DisplayCell, RemoteSession, StreakStats, TodayOverride,
};
pub use domain::streaks::compute_stats;
pub use infrastructure::calendar_store::{CalendarStore, MergeOutcome, NowProvider, STORAGE_KEY};
pub use infrastructure::error::EngineError;
pub use infrastructure::key_value_store::{
    InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore,
};
pub use infrastructure::session_source::WorkoutSessionSource;
pub use infrastructure::storage::initialize_database;
