//! Infrastructure layer: storage, background jobs, payments, email, config.

pub mod access;
pub mod config;
pub mod jobs;
pub mod notify;
pub mod payments;
pub mod store;

pub use access::{ReportAccess, ReportView, RiskView, fetch_report};
pub use config::{AppConfig, ConfigError, Environment, ProviderConfig};

#[cfg(test)]
mod testing;
