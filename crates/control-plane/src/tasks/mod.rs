//! Periodic background loops started next to the HTTP listeners.

pub mod retention;
pub mod stats_flush;
