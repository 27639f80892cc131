//! dog-upload-axum: REST binding of the dog-upload coordinator.
//!
//! Callers identify themselves with the `x-owner-id` header; errors come back
//! as `{name, message, code, className}` JSON.

pub mod app;
mod error;
pub mod rest;
pub mod state;

pub use error::UploadAxumError;
pub use state::{Owner, UploadState};

pub use app::{uploads, UploadsApp};
pub use rest::upload_router;
