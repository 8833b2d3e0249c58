// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy for the identity/ledger engine plus the HTTP mapping.
//!
//! The engine keeps its failure kinds distinguishable all the way to the
//! boundary so the HTTP layer can pick a status code:
//!
//! - `Codec` (an undecodable public identifier) is only ever surfaced
//!   internally; resolvers and the reconciler swallow it into "absent".
//! - `NotFunded` / `InsufficientBalance` are the charge admission outcomes.
//! - `StoreUnavailable` propagates transport/storage faults without retry.
//! - `MalformedEvent` marks a payment event that must be acknowledged but
//!   never processed, so the sender does not loop forever.
//! - `DataCorruption` is fatal to the single request and always logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StoreError;
use crate::token::CodecError;

/// Engine-level failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A public identifier was malformed or its authentication tag failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Charge attempted against an identity with no backing row.
    #[error("identity has no funded balance")]
    NotFunded,

    /// The conditional decrement affected zero rows.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Storage transport fault; not retried here.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Payment event missing required fields; acknowledged, never retried.
    #[error("malformed payment event: {0}")]
    MalformedEvent(String),

    /// An internal consistency check failed.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::StoreUnavailable(e.to_string())
    }
}

// =============================================================================
// HTTP error response
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn payment_required(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            // Never leak why a credential failed to decode.
            CoreError::Codec(_) => ApiError::unauthorized("invalid credential"),
            CoreError::NotFunded => ApiError::payment_required("identity has no funded balance"),
            CoreError::InsufficientBalance => ApiError::payment_required("insufficient balance"),
            CoreError::StoreUnavailable(_) => {
                ApiError::service_unavailable("storage temporarily unavailable")
            }
            CoreError::MalformedEvent(msg) => ApiError::bad_request(msg),
            CoreError::DataCorruption(msg) => {
                tracing::error!(error = %msg, "data corruption detected");
                ApiError::internal("internal consistency error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
