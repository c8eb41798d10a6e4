//! Request and response models for the HTTP API.

pub mod error;

pub use error::{ErrorResponse, HandlerResult, ok};
