// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Core Data Model
//!
//! The authoritative identity key is the raw bearer credential
//! ([`AccessToken`]). Every other identifier is derived: the public
//! identifier (`client_reference_id`) is a deterministic encryption of the
//! credential and is recomputed on every read.
//!
//! ## Identity Classification
//!
//! A stored row is either a **primary** identity (it owns a balance) or a
//! **redirect** stub whose only purpose is to forward session resolution to
//! another credential after a payment-based merge. [`Identity`] makes the
//! one-hop redirect policy a type-level property instead of a nullable
//! column convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// Access Token
// =============================================================================

/// Opaque bearer credential identifying a user.
///
/// Minted as a canonical UUIDv4 string (128-bit random); knowledge of the
/// raw value is the sole authentication factor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessToken(pub String);

impl AccessToken {
    /// Mint a fresh random credential.
    pub fn mint() -> Self {
        AccessToken(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        AccessToken(value)
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        AccessToken(value.to_string())
    }
}

impl From<AccessToken> for String {
    fn from(value: AccessToken) -> Self {
        value.0
    }
}

// =============================================================================
// User Record
// =============================================================================

/// One identity row: lives in its own shard, mirrored into the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserRecord {
    /// Raw bearer credential; the primary key.
    pub access_token: AccessToken,
    /// Funds available, in cents. Negative only via an explicit override.
    pub balance: i64,
    /// Payer-supplied display name (unverified).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Payer-supplied email (unverified).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Email proven by the payment channel itself (non-card methods only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_email: Option<String>,
    /// Forwarding pointer: this row's identity belongs to that credential.
    /// May dangle if the target is later rotated away.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_user_access_token: Option<AccessToken>,
    /// Stable hash of the payment instrument, for recognizing a payer
    /// across anonymous sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_fingerprint: Option<String>,
    /// Current public identifier. Derived from `access_token`; cached here
    /// and rewritten whenever stale. Never a charge key.
    pub client_reference_id: String,
    /// When the row was first constructed.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// A fresh zero-balance identity. Not persisted until a payment lands.
    pub fn new_anonymous(access_token: AccessToken, client_reference_id: String) -> Self {
        let now = Utc::now();
        Self {
            access_token,
            balance: 0,
            name: None,
            email: None,
            verified_email: None,
            verified_user_access_token: None,
            card_fingerprint: None,
            client_reference_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// A redirect stub: carries nothing but the forwarding pointer.
    pub fn new_redirect(
        access_token: AccessToken,
        client_reference_id: String,
        target: AccessToken,
    ) -> Self {
        let mut record = Self::new_anonymous(access_token, client_reference_id);
        record.verified_user_access_token = Some(target);
        record
    }

    /// Classify the row as a primary identity or a redirect stub.
    pub fn identity(self) -> Identity {
        match self.verified_user_access_token.clone() {
            Some(target) => Identity::Redirect(target),
            None => Identity::Primary(self),
        }
    }
}

/// Tagged classification of a stored row.
///
/// Resolution follows a `Redirect` exactly once; the record found at the
/// target is used as-is even if it is itself a redirect.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// A row owning its balance.
    Primary(UserRecord),
    /// A stub forwarding to another credential.
    Redirect(AccessToken),
}

// =============================================================================
// Cookie Directive
// =============================================================================

/// Cookie name carrying the credential.
pub const CREDENTIAL_COOKIE: &str = "tollgate_token";

/// Fixed cookie lifetime: 400 days, the longest current browsers honor.
pub const COOKIE_MAX_AGE_SECS: i64 = 400 * 24 * 60 * 60;

/// Instruction to (re)set the credential cookie, produced on every
/// resolution so the expiry refreshes regardless of whether the identity
/// changed. Rendering to a `Set-Cookie` header is left to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: &'static str,
    pub value: String,
    pub max_age_secs: i64,
    pub secure: bool,
}

impl CookieDirective {
    pub fn for_credential(token: &AccessToken, secure: bool) -> Self {
        Self {
            name: CREDENTIAL_COOKIE,
            value: token.0.clone(),
            max_age_secs: COOKIE_MAX_AGE_SECS,
            secure,
        }
    }

    /// Render the `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut header = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            self.name, self.value, self.max_age_secs
        );
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

// =============================================================================
// Payment Events
// =============================================================================

/// Channel classifier for the payment instrument.
///
/// Only channels where the provider independently authenticates the payer's
/// email (wallet / bank-redirect flows) are trusted to populate
/// `verified_email`. A raw card charge's `customer_details.email` is typed
/// by the payer and proves nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    Card,
    Link,
    Paypal,
    BankRedirect,
    Unknown,
}

impl PaymentChannel {
    /// Map a provider payment-method type string onto a channel.
    pub fn from_method_type(method_type: &str) -> Self {
        match method_type {
            "card" => PaymentChannel::Card,
            "link" => PaymentChannel::Link,
            "paypal" => PaymentChannel::Paypal,
            "bank_transfer" | "sepa_debit" | "ideal" | "bancontact" | "sofort" | "giropay" => {
                PaymentChannel::BankRedirect
            }
            _ => PaymentChannel::Unknown,
        }
    }

    /// Whether the payer email arriving on this channel is independently
    /// proven by the provider.
    pub fn proves_email(&self) -> bool {
        matches!(
            self,
            PaymentChannel::Link | PaymentChannel::Paypal | PaymentChannel::BankRedirect
        )
    }
}

/// Payment-instrument metadata attached to a completed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentInstrument {
    /// Stable fingerprint of the instrument, when the provider exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Channel the payment travelled through.
    pub channel: PaymentChannel,
}

impl PaymentInstrument {
    pub fn unknown() -> Self {
        Self {
            fingerprint: None,
            channel: PaymentChannel::Unknown,
        }
    }
}

/// A verified "payment completed" event as handed to the reconciler.
///
/// Signature verification and detail retrieval happen upstream (see
/// `providers`); by the time this struct exists the event is authentic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentEvent {
    /// Upstream event identifier, used for duplicate suppression.
    pub event_id: String,
    /// Whether the provider reports the payment as completed/paid.
    pub paid: bool,
    /// Payment amount in the smallest currency unit.
    pub amount_minor: i64,
    /// Public identifier the payer carried into checkout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_reference_id: Option<String>,
    /// Payer-supplied name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_name: Option<String>,
    /// Payer-supplied email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_email: Option<String>,
    /// Instrument metadata.
    pub instrument: PaymentInstrument,
}

/// Canonicalize an email for comparison and storage: trim, NFKC, lowercase.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().nfkc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_mint_is_canonical_uuid() {
        let token = AccessToken::mint();
        assert!(Uuid::parse_str(token.as_str()).is_ok());
        assert_ne!(token, AccessToken::mint());
    }

    #[test]
    fn identity_classifies_redirects() {
        let primary = UserRecord::new_anonymous("t1".into(), "pid1".into());
        assert!(matches!(primary.identity(), Identity::Primary(_)));

        let stub = UserRecord::new_redirect("t2".into(), "pid2".into(), "t1".into());
        assert_eq!(stub.identity(), Identity::Redirect("t1".into()));
    }

    #[test]
    fn cookie_directive_renders_attributes() {
        let directive = CookieDirective::for_credential(&"abc".into(), true);
        let header = directive.header_value();
        assert!(header.starts_with("tollgate_token=abc; "));
        assert!(header.contains("Max-Age=34560000"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Path=/"));
        assert!(header.ends_with("; Secure"));
    }

    #[test]
    fn cookie_directive_secure_is_configurable() {
        let directive = CookieDirective::for_credential(&"abc".into(), false);
        assert!(!directive.header_value().contains("Secure"));
    }

    #[test]
    fn channel_trust_mapping() {
        assert!(!PaymentChannel::from_method_type("card").proves_email());
        assert!(PaymentChannel::from_method_type("link").proves_email());
        assert!(PaymentChannel::from_method_type("ideal").proves_email());
        assert!(!PaymentChannel::from_method_type("crypto_thing").proves_email());
    }

    #[test]
    fn email_normalization_is_canonical() {
        assert_eq!(normalize_email("  Payer@Example.COM "), "payer@example.com");
        // NFKC folds the ligature before lowercasing
        assert_eq!(normalize_email("ﬁn@example.com"), "fin@example.com");
    }
}
