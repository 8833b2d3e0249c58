// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stripe integration: webhook intake and charge-detail retrieval.
//!
//! Three concerns live here, all upstream of the reconciler:
//!
//! 1. **Webhook signature verification** — HMAC-SHA256 over
//!    `"{timestamp}.{payload}"` checked against every `v1` candidate in
//!    the `Stripe-Signature` header, with a bounded timestamp tolerance.
//! 2. **Event parsing** — only `checkout.session.completed` events are
//!    interesting; everything else is acknowledged and dropped.
//! 3. **Charge-detail retrieval** — up to two read-only lookups (payment
//!    intent, then its latest charge) to learn the instrument fingerprint
//!    and the payment-method channel. Both are idempotent GETs, safe for
//!    the upstream sender to retry.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;

use crate::models::{PaymentChannel, PaymentInstrument};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Maximum accepted age (and future skew) of a signed webhook, seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("Stripe configuration missing: {0}")]
    MissingConfig(String),

    #[error("webhook signature rejected: {0}")]
    Signature(String),

    #[error("Stripe request failed: {0}")]
    Request(String),

    #[error("Stripe response was invalid: {0}")]
    InvalidResponse(String),
}

/// A parsed `checkout.session.completed` event.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutEvent {
    pub event_id: String,
    pub paid: bool,
    pub amount_minor: i64,
    pub client_reference_id: Option<String>,
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    api_base_url: String,
    secret_key: String,
    webhook_secret: String,
    http: Client,
}

impl StripeClient {
    pub fn is_configured() -> bool {
        required_env_present("STRIPE_SECRET_KEY") && required_env_present("STRIPE_WEBHOOK_SECRET")
    }

    pub fn from_env() -> Result<Self, StripeError> {
        let api_base_url = env_or_default("STRIPE_API_BASE_URL", DEFAULT_API_BASE_URL);
        let secret_key = env_required("STRIPE_SECRET_KEY")?;
        let webhook_secret = env_required("STRIPE_WEBHOOK_SECRET")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| StripeError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url,
            secret_key,
            webhook_secret,
            http,
        })
    }

    /// Build a client directly (tests).
    pub fn with_secrets(
        api_base_url: impl Into<String>,
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            http: Client::new(),
        }
    }

    // =========================================================================
    // Webhook signature
    // =========================================================================

    /// Verify a `Stripe-Signature` header against the raw request body.
    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<(), StripeError> {
        self.verify_signature_at(payload, header, Utc::now().timestamp())
    }

    /// Clock-injected variant of [`Self::verify_signature`].
    pub fn verify_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<(), StripeError> {
        let (timestamp, candidates) = parse_signature_header(header)?;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(StripeError::Signature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| StripeError::Signature("invalid webhook secret".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        for candidate in &candidates {
            let Some(bytes) = decode_hex(candidate) else {
                continue;
            };
            // Mac::verify_slice is a constant-time comparison
            if mac.clone().verify_slice(&bytes).is_ok() {
                return Ok(());
            }
        }

        Err(StripeError::Signature("no matching v1 signature".to_string()))
    }

    // =========================================================================
    // Event parsing
    // =========================================================================

    /// Parse a verified webhook payload. Returns `None` for event types
    /// the reconciler has no interest in.
    pub fn parse_checkout_event(payload: &[u8]) -> Result<Option<CheckoutEvent>, StripeError> {
        let event: Value = serde_json::from_slice(payload)
            .map_err(|e| StripeError::InvalidResponse(format!("webhook body is not JSON: {e}")))?;

        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        if event_type != "checkout.session.completed" {
            return Ok(None);
        }

        let event_id = event
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StripeError::InvalidResponse("missing event id".to_string()))?
            .to_string();

        let session = event
            .pointer("/data/object")
            .ok_or_else(|| StripeError::InvalidResponse("missing data.object".to_string()))?;

        Ok(Some(CheckoutEvent {
            event_id,
            paid: session.get("payment_status").and_then(Value::as_str) == Some("paid"),
            amount_minor: session
                .get("amount_total")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            client_reference_id: session
                .get("client_reference_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            payer_name: session
                .pointer("/customer_details/name")
                .and_then(Value::as_str)
                .map(str::to_string),
            payer_email: session
                .pointer("/customer_details/email")
                .and_then(Value::as_str)
                .map(str::to_string),
            payment_intent: session
                .get("payment_intent")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }

    // =========================================================================
    // Charge detail retrieval
    // =========================================================================

    /// Resolve the instrument behind a payment intent: fingerprint plus
    /// channel classification. Read-only and idempotent.
    pub async fn fetch_instrument(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentInstrument, StripeError> {
        let intent = self
            .get_json(&format!("/v1/payment_intents/{payment_intent_id}"))
            .await?;

        let Some(charge_id) = intent.get("latest_charge").and_then(Value::as_str) else {
            return Ok(PaymentInstrument::unknown());
        };

        let charge = self.get_json(&format!("/v1/charges/{charge_id}")).await?;
        Ok(instrument_from_charge(&charge))
    }

    async fn get_json(&self, path: &str) -> Result<Value, StripeError> {
        let response = self
            .http
            .get(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .send()
            .await
            .map_err(|e| StripeError::Request(format!("GET {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StripeError::Request(format!(
                "GET {path} returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StripeError::InvalidResponse(format!("GET {path} invalid JSON: {e}")))
    }
}

/// Extract the fingerprint and channel from a charge object.
fn instrument_from_charge(charge: &Value) -> PaymentInstrument {
    let Some(details) = charge.get("payment_method_details") else {
        return PaymentInstrument::unknown();
    };
    let method_type = details.get("type").and_then(Value::as_str).unwrap_or("");
    let channel = PaymentChannel::from_method_type(method_type);

    // The fingerprint sits under the method-type-named object, e.g.
    // payment_method_details.card.fingerprint
    let fingerprint = details
        .get(method_type)
        .and_then(|m| m.get("fingerprint"))
        .and_then(Value::as_str)
        .map(str::to_string);

    PaymentInstrument {
        fingerprint,
        channel,
    }
}

/// Parse `t=<unix>,v1=<hex>[,v1=<hex>...]`, tolerating unknown schemes.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<String>), StripeError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => candidates.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| StripeError::Signature("missing timestamp in header".to_string()))?;
    if candidates.is_empty() {
        return Err(StripeError::Signature(
            "missing v1 signature in header".to_string(),
        ));
    }
    Ok((timestamp, candidates))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn required_env_present(name: &str) -> bool {
    env_optional(name).is_some()
}

fn env_required(name: &str) -> Result<String, StripeError> {
    env_optional(name).ok_or_else(|| StripeError::MissingConfig(name.to_string()))
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}
