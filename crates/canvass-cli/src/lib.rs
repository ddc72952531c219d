//! CLI library components for the canvass binary.

pub mod cli;
pub mod commands;
pub mod ingest;
pub mod logging;
pub mod summary;
pub mod types;
