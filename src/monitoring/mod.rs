//! Backend monitoring.

pub mod health;

pub use health::{HealthHandle, HealthMonitor, HealthSnapshot};
