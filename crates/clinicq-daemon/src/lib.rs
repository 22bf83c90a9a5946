//! ClinicQ Daemon library
//!
//! This module provides the components behind `clinicqd`:
//! - REST API handlers for staff terminals and arrival devices
//! - Server-sent event streams for counter dashboards
//! - Background sweeper for lapsed PIN windows
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod sweeper;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
pub use sweeper::Sweeper;
