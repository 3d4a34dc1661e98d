//! HTTP gating adapter
//!
//! Thin axum layer over [`crate::engine::Engine`]: bearer-token middleware,
//! guest onboarding, session control and admin endpoints.

pub mod admin;
pub mod handlers;
pub mod server;

pub use handlers::ApiError;
pub use server::{router, ApiServer};
