//! Squat coach service: HTTP surface and configuration over `coach-lib`

pub mod api;
pub mod config;
