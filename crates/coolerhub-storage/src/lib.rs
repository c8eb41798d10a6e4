//! Storage layer for CoolerHub.
//!
//! - [`ReadingStore`]: append-only reading history on redb
//! - [`StatsEngine`]: windowed statistics over the newest readings of a device

pub mod error;
pub mod readings;
pub mod stats;

pub use error::{Error, Result};
pub use readings::ReadingStore;
pub use stats::{StatsEngine, compute_stats};
