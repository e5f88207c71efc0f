//! Owner identity extractor.
//!
//! Authentication happens upstream; the authenticating proxy forwards the
//! caller's user id in the `X-Owner-Id` header.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use boardflow_core::UserId;
use serde_json::json;

/// Header carrying the authenticated user's id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Extractor for the authenticated owner of a request.
pub struct Owner(pub UserId);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = OwnerRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or(OwnerRejection::Missing)?;
        let value = value.to_str().map_err(|_| OwnerRejection::Invalid)?;
        let owner = value
            .trim()
            .parse::<UserId>()
            .map_err(|_| OwnerRejection::Invalid)?;
        Ok(Owner(owner))
    }
}

/// Rejection type for the owner extractor.
#[derive(Debug)]
pub enum OwnerRejection {
    Missing,
    Invalid,
}

impl IntoResponse for OwnerRejection {
    fn into_response(self) -> Response {
        let message = match self {
            Self::Missing => "Not authenticated",
            Self::Invalid => "Invalid owner identity",
        };
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
    }
}
