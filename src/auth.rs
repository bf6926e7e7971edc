//! Request identity extractors.
//!
//! Authentication itself is delegated to the fronting OAuth provider, which
//! injects the verified user identity as `x-user-email` and forwards the
//! Google access token as a bearer `Authorization` header for drive calls.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::StatusCode, http::request::Parts};

const USER_HEADER: &str = "x-user-email";

/// The authenticated user's email, required on every API route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub email: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "authentication required"))?;
        Ok(AuthUser {
            email: email.to_string(),
        })
    }
}

/// Bearer token for Google Drive calls, required only on drive routes.
#[derive(Debug, Clone)]
pub struct DriveToken(pub String);

impl<S> FromRequestParts<S> for DriveToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::new(StatusCode::UNAUTHORIZED, "drive access token is missing")
            })?;
        Ok(DriveToken(token.to_string()))
    }
}
