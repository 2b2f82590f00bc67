//! # fprank Common Library
//!
//! Shared code for the fprank percentile engine:
//! - Cohort, test type and metric catalog
//! - Validated per-test-type session metrics
//! - Database initialization and row models
//! - Configuration loading
//! - Timestamp and date-bucket helpers

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod time;

pub use error::{Error, Result};
pub use model::{Cohort, Metric, MetricDefinition, SessionMetrics, TestType};
