//! Persisted configuration and per-application state

pub mod app_record;
pub mod layout;
pub mod settings;
