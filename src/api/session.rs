// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session resolution endpoint.

use axum::{extract::State, response::Response, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::Credential;
use crate::error::ApiError;
use crate::session::ResolvedSession;
use crate::state::AppState;

use super::with_cookie;

/// User summary returned to clients. Never includes the raw credential in
/// the body: that value travels only in the Set-Cookie header.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    /// Public identifier, safe for URLs and checkout metadata.
    pub public_id: String,
    /// Balance in cents.
    pub balance: i64,
    /// Payer-supplied display name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Payer-supplied email, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Whether a backing ledger row exists yet.
    pub funded: bool,
}

impl From<&ResolvedSession> for SessionResponse {
    fn from(session: &ResolvedSession) -> Self {
        Self {
            public_id: session.user.client_reference_id.clone(),
            balance: session.user.balance,
            name: session.user.name.clone(),
            email: session.user.email.clone(),
            funded: session.is_funded(),
        }
    }
}

/// Resolve the request credential to a user, refreshing the cookie.
#[utoipa::path(
    get,
    path = "/v1/session",
    tag = "Session",
    responses(
        (status = 200, description = "Resolved session", body = SessionResponse),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Credential(credential): Credential,
) -> Result<Response, ApiError> {
    let session = state.resolver.resolve(credential.as_deref())?;
    let body = Json(SessionResponse::from(&session));
    Ok(with_cookie(&session.cookie, body))
}
