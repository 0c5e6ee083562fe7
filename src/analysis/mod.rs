//! Read-side aggregation for dashboards and reports.

pub mod health;
pub mod performance;
pub mod stats;

pub use self::health::{HealthAggregator, HealthScope, HealthSnapshot, OverallStatus};
pub use self::performance::{PerformanceQuery, PerformanceReport, ReportError, ReportPeriod};
