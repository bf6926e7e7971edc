//! Database row types for transcription history.
//!
//! These map to SQLite tables via `sqlx::FromRow` and serialize naturally as
//! JSON via `serde`.

pub mod history;
