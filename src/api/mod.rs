//! chartcalc API server module
//!
//! HTTP REST API over the calculation engine.
//! Run with `chartcalc-server`.

pub mod handlers;
pub mod server;

pub use server::{build_router, run_api_server, ApiConfig, AppState};
