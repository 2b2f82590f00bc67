//! HTTP API handlers
//!
//! Every route group exposes a `*_routes()` builder that `build_router`
//! merges; handlers delegate straight to the services in [`crate::AppState`].

pub mod athletes;
pub mod health;
pub mod percentiles;
pub mod rebuild;
pub mod sessions;

pub use athletes::athlete_routes;
pub use health::health_routes;
pub use percentiles::percentile_routes;
pub use rebuild::rebuild_routes;
pub use sessions::session_routes;
