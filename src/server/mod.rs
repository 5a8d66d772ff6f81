//! HTTP transport over the placement engine.

pub mod api;

pub use api::{build_router, AppState};
