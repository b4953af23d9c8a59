//! Request handlers for the lab gateway.
//!
//! Session-scoped handlers receive their token through [`SessionAuth`]
//! and map lifecycle outcomes onto HTTP; none of them touch session state
//! directly.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::gateway::GatewayState;
use crate::gateway::auth::{SessionAuth, to_registration};
use crate::identity::Identity;
use crate::lifecycle::{Access, EXPIRED_NOTICE, PollStatus, SessionToken};
use crate::notify::format_time_left;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub identity: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub session: SessionToken,
    pub identity: Identity,
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub flag: String,
}

#[derive(Debug, Serialize)]
pub struct FlagResponse {
    pub correct: bool,
}

#[derive(Debug, Serialize)]
pub struct ExtendResponse {
    pub expiry: DateTime<Utc>,
    pub time_left: String,
}

/// Body returned whenever an access finds the session expired.
#[derive(Debug, Serialize)]
pub struct ExpiredNotice {
    pub expired: bool,
    pub notice: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Lifecycle errors as HTTP responses.
pub struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LifecycleError::DuplicateIdentity(_) => StatusCode::CONFLICT,
            LifecycleError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            LifecycleError::NoSession => return to_registration().into_response(),
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn granted_or_notice<T: Serialize>(access: Access<T>) -> Response {
    match access {
        Access::Granted(body) => Json(body).into_response(),
        Access::Expired => Json(ExpiredNotice {
            expired: true,
            notice: EXPIRED_NOTICE,
        })
        .into_response(),
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn register(
    State(state): State<GatewayState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let registration = state.lifecycle.register(&req.identity).await.map_err(|e| {
        tracing::info!(identity = %req.identity, error = %e, "Registration rejected");
        e
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RegisterResponse {
            status: "provisioning",
            session: registration.session,
            identity: registration.identity,
        }),
    ))
}

pub async fn status(
    State(state): State<GatewayState>,
    SessionAuth(token): SessionAuth,
) -> Result<Json<PollStatus>, ApiError> {
    Ok(Json(state.lifecycle.poll_status(&token).await?))
}

pub async fn dashboard(
    State(state): State<GatewayState>,
    SessionAuth(token): SessionAuth,
) -> Result<Response, ApiError> {
    Ok(granted_or_notice(state.lifecycle.dashboard(&token).await?))
}

pub async fn extend(
    State(state): State<GatewayState>,
    SessionAuth(token): SessionAuth,
) -> Result<Response, ApiError> {
    let access = state.lifecycle.extend(&token).await?;
    let now = state.lifecycle.clock().now();
    Ok(granted_or_notice(match access {
        Access::Granted(expiry) => Access::Granted(ExtendResponse {
            expiry,
            time_left: format_time_left(expiry - now),
        }),
        Access::Expired => Access::Expired,
    }))
}

pub async fn submit_flag(
    State(state): State<GatewayState>,
    SessionAuth(token): SessionAuth,
    Json(req): Json<FlagRequest>,
) -> Result<Response, ApiError> {
    let access = state.lifecycle.submit_flag(&token, &req.flag).await?;
    Ok(granted_or_notice(match access {
        Access::Granted(correct) => Access::Granted(FlagResponse { correct }),
        Access::Expired => Access::Expired,
    }))
}

pub async fn check_flag(
    State(state): State<GatewayState>,
    Json(req): Json<FlagRequest>,
) -> Json<FlagResponse> {
    Json(FlagResponse {
        correct: state.lifecycle.check_flag(&req.flag),
    })
}

/// Drops the session and sends the client back to registration.
pub async fn logout(
    State(state): State<GatewayState>,
    SessionAuth(token): SessionAuth,
) -> Response {
    state.lifecycle.logout(&token).await;
    to_registration().into_response()
}
