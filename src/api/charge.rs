// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Charge endpoint: the admission-control primitive.
//!
//! This route is intended for the resource layer sitting in front of the
//! metered service, not for end users: `allow_negative` is an operator
//! override that bypasses the balance predicate.

use axum::{extract::State, response::Response, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Credential;
use crate::error::ApiError;
use crate::state::AppState;

use super::with_cookie;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChargeRequest {
    /// Amount to deduct, in cents. Must be positive.
    pub amount_cents: i64,
    /// Decrement even if the balance would go negative.
    #[serde(default)]
    pub allow_negative: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChargeResponse {
    /// Remaining balance after the charge, in cents.
    pub balance: i64,
}

/// Conditionally decrement the resolved identity's balance.
#[utoipa::path(
    post,
    path = "/v1/charge",
    tag = "Ledger",
    request_body = ChargeRequest,
    responses(
        (status = 200, description = "Charge applied", body = ChargeResponse),
        (status = 400, description = "Invalid amount"),
        (status = 402, description = "Unfunded identity or insufficient balance"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn charge(
    State(state): State<AppState>,
    Credential(credential): Credential,
    Json(request): Json<ChargeRequest>,
) -> Result<Response, ApiError> {
    if request.amount_cents <= 0 {
        return Err(ApiError::bad_request("amount_cents must be positive"));
    }

    let session = state.resolver.resolve(credential.as_deref())?;
    let row = state.ledger.charge(
        session.shard.as_ref(),
        request.amount_cents,
        request.allow_negative,
    )?;

    let body = Json(ChargeResponse { balance: row.balance });
    Ok(with_cookie(&session.cookie, body))
}
