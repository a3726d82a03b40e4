//! # Web API
//!
//! Axum surface for the pipeline: coordinator control endpoints, the two
//! push-delivery endpoints (completion signals and work items), and health
//! probes. Handlers only translate between HTTP and the domain components;
//! every decision lives below this layer.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
