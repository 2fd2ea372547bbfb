pub mod calendar_store;
pub mod error;
pub mod key_value_store;
pub mod session_source;
pub mod storage;
