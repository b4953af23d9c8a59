//! Bearer-token session extraction.
//!
//! Every session-scoped route takes a [`SessionAuth`]. A missing, malformed
//! or unknown token is treated the same as a request from the wrong state:
//! the client is sent back to the registration flow with `303 See Other`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::Redirect;

use crate::lifecycle::SessionToken;

/// Where wrong-state requests are redirected.
pub const REGISTRATION_PATH: &str = "/";

pub fn to_registration() -> Redirect {
    Redirect::to(REGISTRATION_PATH)
}

/// The session token presented as `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct SessionAuth(pub SessionToken);

impl<S: Send + Sync> FromRequestParts<S> for SessionAuth {
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(SessionToken::parse)
            .map(SessionAuth)
            .ok_or_else(|| {
                tracing::debug!("Request without a usable session token");
                to_registration()
            })
    }
}
