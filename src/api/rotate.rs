// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential rotation endpoint.

use axum::{extract::State, response::Response, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::Credential;
use crate::error::ApiError;
use crate::state::AppState;

use super::with_cookie;

#[derive(Debug, Serialize, ToSchema)]
pub struct RotateResponse {
    /// The new raw credential. Cookie-based clients should ignore this —
    /// their copy arrives via Set-Cookie — but bearer-style clients have
    /// no other channel to learn it.
    pub access_token: String,
    /// Public identifier of the new credential.
    pub public_id: String,
    /// Balance carried over, in cents.
    pub balance: i64,
}

/// Migrate the resolved identity onto a fresh credential.
#[utoipa::path(
    post,
    path = "/v1/session/rotate",
    tag = "Session",
    responses(
        (status = 200, description = "Credential rotated", body = RotateResponse),
        (status = 402, description = "Identity has no backing row"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn rotate_session(
    State(state): State<AppState>,
    Credential(credential): Credential,
) -> Result<Response, ApiError> {
    let session = state.resolver.resolve(credential.as_deref())?;
    let outcome = state.ledger.rotate(&session)?;

    let body = Json(RotateResponse {
        access_token: outcome.user.access_token.0.clone(),
        public_id: outcome.user.client_reference_id.clone(),
        balance: outcome.user.balance,
    });
    Ok(with_cookie(&outcome.cookie, body))
}
