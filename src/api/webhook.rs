// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment webhook intake.
//!
//! Status-code contract with the upstream sender:
//! - 200 — handled, ignored, or duplicate: stop delivering this event.
//! - 400 — bad signature or unparseable body: a broken sender, stop.
//! - 503 — store or provider lookup fault: transient, retry later.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::error::{ApiError, CoreError};
use crate::models::{PaymentEvent, PaymentInstrument};
use crate::providers::stripe::StripeClient;
use crate::reconcile::ReconcileOutcome;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// What the reconciler did, when the event was of interest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
}

/// Verify, parse, enrich, and reconcile one provider webhook delivery.
#[utoipa::path(
    post,
    path = "/v1/webhooks/checkout",
    tag = "Webhooks",
    request_body(content = String, description = "Raw provider webhook payload"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Invalid signature or body"),
        (status = 503, description = "Transient fault; retry")
    )
)]
pub async fn checkout_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let Some(provider) = state.provider.as_ref() else {
        return Err(ApiError::service_unavailable(
            "payment provider not configured",
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing Stripe-Signature header"))?;

    provider.verify_signature(&body, signature).map_err(|e| {
        warn!(error = %e, "webhook signature rejected");
        ApiError::bad_request("invalid webhook signature")
    })?;

    let Some(parsed) = StripeClient::parse_checkout_event(&body)
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    else {
        // Authentic but uninteresting event type
        return Ok(Json(WebhookAck {
            received: true,
            outcome: None,
        }));
    };

    let instrument = match parsed.payment_intent.as_deref() {
        Some(payment_intent) => provider.fetch_instrument(payment_intent).await.map_err(|e| {
            warn!(error = %e, "charge detail retrieval failed");
            ApiError::service_unavailable("charge detail retrieval failed")
        })?,
        None => PaymentInstrument::unknown(),
    };

    let event = PaymentEvent {
        event_id: parsed.event_id,
        paid: parsed.paid,
        amount_minor: parsed.amount_minor,
        client_reference_id: parsed.client_reference_id,
        payer_name: parsed.payer_name,
        payer_email: parsed.payer_email,
        instrument,
    };

    match state.reconciler.reconcile(&event) {
        Ok(outcome) => Ok(Json(WebhookAck {
            received: true,
            outcome: Some(outcome),
        })),
        // A malformed event must be acknowledged, or the sender loops forever
        Err(CoreError::MalformedEvent(reason)) => {
            warn!(event_id = %event.event_id, %reason, "discarding malformed payment event");
            Ok(Json(WebhookAck {
                received: true,
                outcome: None,
            }))
        }
        Err(e) => Err(e.into()),
    }
}
