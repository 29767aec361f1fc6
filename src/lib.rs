//! OrgTrail - Backend Library
//!
//! Organization management backend built around a tamper-evident audit
//! ledger: every mutating action is recorded as an append-only,
//! cryptographically chained record.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
