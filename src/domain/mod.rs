pub mod date_key;
pub mod grid;
pub mod models;
pub mod streaks;
