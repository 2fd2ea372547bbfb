pub mod backfill;
pub mod engine;
