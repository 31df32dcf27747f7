//! Backend implementations for the catalog
//!
//! - `sqlite`: SQLite-based backend (default, requires `sqlite` feature)
//! - `memory`: process-local catalog for tests and dry runs

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;
