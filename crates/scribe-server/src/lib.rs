//! HTTP surface for the scribe streaming engine.

pub mod config;
pub mod error;
pub mod routes;

pub use config::ServerArgs;
pub use error::ApiError;
pub use routes::{AppState, app};
