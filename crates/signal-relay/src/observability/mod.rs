//! Observability: health endpoints and shared health state.

pub mod health;

pub use health::{health_router, HealthState};
