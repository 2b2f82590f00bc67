//! Domain model: cohorts, test types, the metric catalog and session payloads

pub mod cohort;
pub mod metric;
pub mod session;

pub use cohort::Cohort;
pub use metric::{Metric, MetricDefinition, TestType, CATALOG};
pub use session::{IncompleteMetrics, RawMetrics, ReferenceRecord, SessionMetrics, TestSession};
