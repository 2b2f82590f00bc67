//! Engine services
//!
//! Each component is a cheaply cloneable struct over the shared SQLite
//! pool. [`SessionIngestor`] wires the per-session path together;
//! [`LookupBuilder`] runs on its own trigger.

pub mod composite;
pub mod contribution_pool;
pub mod history;
pub mod ingest;
pub mod lookup_builder;
pub mod percentile_query;

pub use composite::{compose_test_type, CompositeAggregator, CompositeOutcome};
pub use contribution_pool::{Admission, ContributionPool, SkipReason};
pub use history::{HistoryStore, Trend};
pub use ingest::{AthleteResult, AthleteStatus, BatchReport, MetricPercentile, SessionIngestor, SessionOutcome};
pub use lookup_builder::{LookupBuilder, PairRebuild, RebuildReport, RebuildStatus};
pub use percentile_query::{PercentileLookups, PercentileQuery, ThresholdTable};
