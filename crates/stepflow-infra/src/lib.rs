//! Infrastructure for stepflow: the SQLite store and configuration loading.

pub mod config;
pub mod sqlite;
