//! Stowage API Library
//!
//! This crate provides the HTTP API handlers, middleware, and application setup.

mod handlers;
mod middleware;
mod telemetry;
mod utils;

pub mod error;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
