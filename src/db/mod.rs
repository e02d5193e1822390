//! Database module for pulsewatch.
//!
//! SQLite-backed key-value storage plus the typed monitor registry and
//! status snapshot built on top of it.

mod models;
mod registry;
mod status;
mod store;

pub use models::*;
pub use registry::*;
pub use status::*;
pub use store::*;
