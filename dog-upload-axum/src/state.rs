use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use dog_upload::uploader::OWNER_HEADER;
use dog_upload::{UploadCoordinator, UploadError};

use crate::UploadAxumError;

#[derive(Clone)]
pub struct UploadState {
    pub coordinator: Arc<UploadCoordinator>,
}

impl UploadState {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Caller identity taken from the `x-owner-id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = UploadAxumError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| UploadError::not_authenticated("Missing x-owner-id header").into())
    }
}
