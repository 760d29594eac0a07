//! Subcommand implementations

pub mod dataset;
pub mod jobs;
