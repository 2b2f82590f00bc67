//! Database access for the percentile engine
//!
//! Schema creation lives in `fprank_common::db::init`; these modules hold
//! the queries each service runs against it.

pub mod contributions;
pub mod events;
pub mod reference;
pub mod samples;
pub mod sessions;
pub mod settings;
pub mod thresholds;

use fprank_common::model::CATALOG;

/// Catalog metric columns, comma separated, in priority order
pub(crate) fn metric_column_list() -> String {
    CATALOG.iter().map(|def| def.key).collect::<Vec<_>>().join(", ")
}

/// One `?` per catalog metric column
pub(crate) fn metric_placeholders() -> String {
    vec!["?"; CATALOG.len()].join(", ")
}
