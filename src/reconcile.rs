// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Reconciler
//!
//! Invoked once per verified "payment completed" event. Decides whether
//! the payment funds an existing identity, merges into an alternate
//! identity recognized by verified email or card fingerprint, or creates a
//! brand-new identity.
//!
//! The merge path is how "login by payment on a new device" works: the new
//! credential gets a stub row whose only content is a forwarding pointer,
//! and the money lands on the canonical identity — the payer never
//! authenticates by anything other than paying again with a recognizable
//! instrument.
//!
//! Delivery is at-least-once upstream, so every event id is checked
//! against a processed-event ledger before any mutation and recorded after
//! the mutation commits. A duplicate delivery is acknowledged as a no-op.
//! (Two deliveries racing through the check concurrently can still both
//! apply; the window is the same one the upstream provider already imposes
//! between its own retries.)

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::models::{normalize_email, AccessToken, PaymentEvent, UserRecord};
use crate::storage::{AggregateView, MirrorOp, MirrorWriter, ShardStore, StoreRouter, UserShard};
use crate::token::{CodecError, TokenCodec};

/// What the reconciler did with an event.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The event is not addressed to this system; acknowledged, dropped.
    Ignored { reason: String },
    /// The event id was already processed.
    Duplicate,
    /// An existing identity was credited.
    Credited { balance: i64 },
    /// A brand-new identity was created (the common new-payer path).
    Created { balance: i64 },
    /// The payment funded an alternate identity; the paying credential
    /// became a forwarding stub.
    Merged { balance: i64 },
}

pub struct PaymentReconciler {
    codec: Arc<TokenCodec>,
    router: Arc<StoreRouter>,
    store: Arc<ShardStore>,
    mirror: MirrorWriter,
    ledger: Arc<Ledger>,
    aggregate: AggregateView,
}

impl PaymentReconciler {
    pub fn new(
        codec: Arc<TokenCodec>,
        router: Arc<StoreRouter>,
        store: Arc<ShardStore>,
        mirror: MirrorWriter,
        ledger: Arc<Ledger>,
        aggregate: AggregateView,
    ) -> Self {
        Self {
            codec,
            router,
            store,
            mirror,
            ledger,
            aggregate,
        }
    }

    /// Reconcile one verified payment event against the ledger.
    pub fn reconcile(&self, event: &PaymentEvent) -> Result<ReconcileOutcome, CoreError> {
        // Preconditions: nothing mutates until the event is fully vetted.
        if event.event_id.trim().is_empty() {
            return Err(CoreError::MalformedEvent("missing event id".to_string()));
        }
        if !event.paid {
            return Err(CoreError::MalformedEvent(
                "payment is not in a completed state".to_string(),
            ));
        }
        if event.amount_minor <= 0 {
            return Err(CoreError::MalformedEvent(
                "payment amount must be positive".to_string(),
            ));
        }
        let Some(public_id) = event.client_reference_id.as_deref() else {
            return Err(CoreError::MalformedEvent(
                "missing client reference id".to_string(),
            ));
        };

        if self.store.is_event_processed(&event.event_id)? {
            info!(event_id = %event.event_id, "duplicate payment event suppressed");
            return Ok(ReconcileOutcome::Duplicate);
        }

        // An identifier minted under another secret (or another system
        // entirely) is not an error: acknowledge so the sender stops.
        let token = match self.codec.decode(public_id) {
            Ok(token) => token,
            Err(CodecError::Decode) => {
                info!(event_id = %event.event_id, "client reference is not addressed to this system");
                return Ok(ReconcileOutcome::Ignored {
                    reason: "unrecognized client reference".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let payer_email = event.payer_email.as_deref().map(normalize_email);
        let verified_email = payer_email
            .clone()
            .filter(|_| event.instrument.channel.proves_email());

        let outcome = match self.aggregate.find_by_token(token.as_str())? {
            Some(_) => self.credit_existing(event, public_id, payer_email.as_deref())?,
            None => {
                let alternate = self.find_alternate(verified_email.as_deref(), event)?;
                match alternate {
                    None => self.create_identity(
                        event,
                        token,
                        payer_email.clone(),
                        verified_email.clone(),
                    )?,
                    Some(primary) => {
                        self.merge_into(event, token, primary, payer_email.as_deref())?
                    }
                }
            }
        };

        self.store.mark_event_processed(&event.event_id)?;
        Ok(outcome)
    }

    /// Branch 2: the paying credential already has a row — credit it,
    /// addressed by the public identifier the payer carried into checkout.
    fn credit_existing(
        &self,
        event: &PaymentEvent,
        public_id: &str,
        payer_email: Option<&str>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let route = self.router.route(public_id)?;
        let shard = UserShard::new(Arc::clone(&self.store), route);
        let row = self.ledger.credit(
            &shard,
            event.amount_minor,
            event.payer_name.as_deref(),
            payer_email,
        )?;
        info!(event_id = %event.event_id, balance = row.balance, "credited existing identity");
        Ok(ReconcileOutcome::Credited {
            balance: row.balance,
        })
    }

    /// Search the aggregate for a previously funded identity belonging to
    /// the same payer: verified email first, card fingerprint second.
    fn find_alternate(
        &self,
        verified_email: Option<&str>,
        event: &PaymentEvent,
    ) -> Result<Option<UserRecord>, CoreError> {
        if let Some(email) = verified_email {
            if let Some(found) = self.aggregate.find_by_verified_email(email)? {
                return Ok(Some(found));
            }
        }
        if let Some(fingerprint) = event.instrument.fingerprint.as_deref() {
            if let Some(found) = self.aggregate.find_by_fingerprint(fingerprint)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Branch 4a: the common new-payer path.
    fn create_identity(
        &self,
        event: &PaymentEvent,
        token: AccessToken,
        payer_email: Option<String>,
        verified_email: Option<String>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let public_id = self.codec.encode(&token)?;
        let mut row = UserRecord::new_anonymous(token.clone(), public_id);
        row.balance = event.amount_minor;
        row.name = event.payer_name.clone();
        row.email = payer_email;
        row.verified_email = verified_email;
        row.card_fingerprint = event.instrument.fingerprint.clone();

        let (route, _) = self.router.route_token(&token)?;
        UserShard::new(Arc::clone(&self.store), route).insert(&row)?;
        self.mirror.replicate(MirrorOp::Upsert(row.clone()));

        info!(event_id = %event.event_id, balance = row.balance, "created new funded identity");
        Ok(ReconcileOutcome::Created {
            balance: row.balance,
        })
    }

    /// Branch 4b: a previously funded identity matched by instrument.
    /// The paying credential becomes a forwarding stub and the money lands
    /// on the primary row, addressed via its own shard route.
    fn merge_into(
        &self,
        event: &PaymentEvent,
        token: AccessToken,
        primary: UserRecord,
        payer_email: Option<&str>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let stub_public_id = self.codec.encode(&token)?;
        let stub =
            UserRecord::new_redirect(token.clone(), stub_public_id, primary.access_token.clone());
        let (stub_route, _) = self.router.route_token(&token)?;
        UserShard::new(Arc::clone(&self.store), stub_route).insert(&stub)?;
        self.mirror.replicate(MirrorOp::Upsert(stub));

        let (primary_route, _) = self.router.route_token(&primary.access_token)?;
        let primary_shard = UserShard::new(Arc::clone(&self.store), primary_route);
        let row = self.ledger.credit(
            &primary_shard,
            event.amount_minor,
            event.payer_name.as_deref(),
            payer_email,
        )?;

        info!(
            event_id = %event.event_id,
            balance = row.balance,
            "merged payment into recognized identity"
        );
        Ok(ReconcileOutcome::Merged {
            balance: row.balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentChannel, PaymentInstrument};
    use crate::session::SessionResolver;

    const SECRET: &str = "reconciler-test-secret";

    struct Harness {
        codec: Arc<TokenCodec>,
        resolver: SessionResolver,
        reconciler: PaymentReconciler,
        aggregate: AggregateView,
    }

    fn harness() -> Harness {
        let codec = Arc::new(TokenCodec::new(SECRET).unwrap());
        let router = Arc::new(StoreRouter::new(Arc::clone(&codec), "v1", SECRET));
        let store = Arc::new(ShardStore::in_memory().unwrap());
        let mirror = MirrorWriter::new(Arc::clone(&store), router.aggregate_shard());
        let aggregate = AggregateView::new(Arc::clone(&store), router.aggregate_shard());
        let resolver = SessionResolver::new(
            Arc::clone(&codec),
            Arc::clone(&router),
            Arc::clone(&store),
            mirror.clone(),
            true,
        );
        let ledger = Arc::new(Ledger::new(
            Arc::clone(&router),
            Arc::clone(&store),
            mirror.clone(),
            true,
        ));
        let reconciler = PaymentReconciler::new(
            Arc::clone(&codec),
            router,
            store,
            mirror,
            ledger,
            aggregate.clone(),
        );
        Harness {
            codec,
            resolver,
            reconciler,
            aggregate,
        }
    }

    fn card_event(event_id: &str, public_id: &str, amount: i64, fingerprint: &str) -> PaymentEvent {
        PaymentEvent {
            event_id: event_id.to_string(),
            paid: true,
            amount_minor: amount,
            client_reference_id: Some(public_id.to_string()),
            payer_name: Some("Card Payer".to_string()),
            payer_email: Some("payer@example.com".to_string()),
            instrument: PaymentInstrument {
                fingerprint: Some(fingerprint.to_string()),
                channel: PaymentChannel::Card,
            },
        }
    }

    #[test]
    fn new_payer_creates_funded_identity() {
        let h = harness();
        let t1 = AccessToken::from("token-t1");
        let public_id = h.codec.encode(&t1).unwrap();

        let outcome = h
            .reconciler
            .reconcile(&card_event("evt_new", &public_id, 500, "F1"))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created { balance: 500 });

        let row = h.aggregate.find_by_token("token-t1").unwrap().unwrap();
        assert_eq!(row.balance, 500);
        assert_eq!(row.card_fingerprint.as_deref(), Some("F1"));
        // Card channel email is never trusted as verified
        assert!(row.verified_email.is_none());
        assert_eq!(row.email.as_deref(), Some("payer@example.com"));
    }

    #[test]
    fn repeat_payment_credits_existing_identity() {
        let h = harness();
        let t1 = AccessToken::from("token-repeat");
        let public_id = h.codec.encode(&t1).unwrap();

        h.reconciler
            .reconcile(&card_event("evt_1", &public_id, 500, "F1"))
            .unwrap();
        let outcome = h
            .reconciler
            .reconcile(&card_event("evt_2", &public_id, 250, "F1"))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Credited { balance: 750 });
    }

    #[test]
    fn same_fingerprint_on_fresh_credential_merges() {
        let h = harness();
        let t1 = AccessToken::from("token-t1");
        let t2 = AccessToken::from("token-t2");
        let pid1 = h.codec.encode(&t1).unwrap();
        let pid2 = h.codec.encode(&t2).unwrap();

        h.reconciler
            .reconcile(&card_event("evt_first", &pid1, 500, "F1"))
            .unwrap();
        let outcome = h
            .reconciler
            .reconcile(&card_event("evt_second", &pid2, 300, "F1"))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Merged { balance: 800 });

        // T2 ended as a forwarding stub, T1 holds the combined balance
        let stub = h.aggregate.find_by_token("token-t2").unwrap().unwrap();
        assert_eq!(stub.verified_user_access_token, Some(t1.clone()));
        assert_eq!(stub.balance, 0);
        let primary = h.aggregate.find_by_token("token-t1").unwrap().unwrap();
        assert_eq!(primary.balance, 800);

        // A session presenting T2 now lands on T1
        let session = h.resolver.resolve(Some("token-t2")).unwrap();
        assert_eq!(session.user.access_token, t1);
        assert_eq!(session.user.balance, 800);
    }

    #[test]
    fn verified_email_channel_merges_without_fingerprint() {
        let h = harness();
        let t1 = AccessToken::from("token-bank1");
        let t2 = AccessToken::from("token-bank2");
        let pid1 = h.codec.encode(&t1).unwrap();
        let pid2 = h.codec.encode(&t2).unwrap();

        let bank = |event_id: &str, pid: &str, amount: i64| PaymentEvent {
            event_id: event_id.to_string(),
            paid: true,
            amount_minor: amount,
            client_reference_id: Some(pid.to_string()),
            payer_name: None,
            payer_email: Some("  Payer@Example.COM ".to_string()),
            instrument: PaymentInstrument {
                fingerprint: None,
                channel: PaymentChannel::BankRedirect,
            },
        };

        h.reconciler.reconcile(&bank("evt_b1", &pid1, 400)).unwrap();
        let first = h.aggregate.find_by_token("token-bank1").unwrap().unwrap();
        assert_eq!(first.verified_email.as_deref(), Some("payer@example.com"));

        let outcome = h.reconciler.reconcile(&bank("evt_b2", &pid2, 100)).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Merged { balance: 500 });
    }

    #[test]
    fn verified_email_match_wins_over_fingerprint_match() {
        let h = harness();
        let email_identity = AccessToken::from("token-email");
        let card_identity = AccessToken::from("token-card");
        let fresh = AccessToken::from("token-fresh");
        let pid_email = h.codec.encode(&email_identity).unwrap();
        let pid_card = h.codec.encode(&card_identity).unwrap();
        let pid_fresh = h.codec.encode(&fresh).unwrap();

        // Identity A: known by verified email
        h.reconciler
            .reconcile(&PaymentEvent {
                event_id: "evt_a".to_string(),
                paid: true,
                amount_minor: 100,
                client_reference_id: Some(pid_email),
                payer_name: None,
                payer_email: Some("payer@example.com".to_string()),
                instrument: PaymentInstrument {
                    fingerprint: None,
                    channel: PaymentChannel::Link,
                },
            })
            .unwrap();
        // Identity B: known by fingerprint
        h.reconciler
            .reconcile(&card_event("evt_b", &pid_card, 100, "F9"))
            .unwrap();

        // Fresh credential pays via a trusted channel with both signals
        let outcome = h
            .reconciler
            .reconcile(&PaymentEvent {
                event_id: "evt_c".to_string(),
                paid: true,
                amount_minor: 50,
                client_reference_id: Some(pid_fresh),
                payer_name: None,
                payer_email: Some("payer@example.com".to_string()),
                instrument: PaymentInstrument {
                    fingerprint: Some("F9".to_string()),
                    channel: PaymentChannel::Link,
                },
            })
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Merged { balance: 150 });

        // The stub points at the email identity, not the card identity
        let stub = h.aggregate.find_by_token("token-fresh").unwrap().unwrap();
        assert_eq!(stub.verified_user_access_token, Some(email_identity));
        assert_eq!(
            h.aggregate
                .find_by_token("token-card")
                .unwrap()
                .unwrap()
                .balance,
            100
        );
    }

    #[test]
    fn foreign_client_reference_is_ignored_not_errored() {
        let h = harness();
        let outcome = h
            .reconciler
            .reconcile(&card_event("evt_foreign", "not-ours-at-all", 500, "F1"))
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Ignored { .. }));
    }

    #[test]
    fn malformed_events_are_rejected_before_mutation() {
        let h = harness();
        let t1 = AccessToken::from("token-malformed");
        let pid = h.codec.encode(&t1).unwrap();

        let mut unpaid = card_event("evt_m1", &pid, 500, "F1");
        unpaid.paid = false;
        assert!(matches!(
            h.reconciler.reconcile(&unpaid),
            Err(CoreError::MalformedEvent(_))
        ));

        let zero = card_event("evt_m2", &pid, 0, "F1");
        assert!(matches!(
            h.reconciler.reconcile(&zero),
            Err(CoreError::MalformedEvent(_))
        ));

        let mut missing_ref = card_event("evt_m3", &pid, 500, "F1");
        missing_ref.client_reference_id = None;
        assert!(matches!(
            h.reconciler.reconcile(&missing_ref),
            Err(CoreError::MalformedEvent(_))
        ));

        // None of the rejected events created a row
        assert!(h.aggregate.find_by_token("token-malformed").unwrap().is_none());
    }

    #[test]
    fn duplicate_delivery_is_a_no_op() {
        let h = harness();
        let t1 = AccessToken::from("token-dup");
        let pid = h.codec.encode(&t1).unwrap();
        let event = card_event("evt_dup", &pid, 500, "F1");

        h.reconciler.reconcile(&event).unwrap();
        let second = h.reconciler.reconcile(&event).unwrap();
        assert_eq!(second, ReconcileOutcome::Duplicate);

        let row = h.aggregate.find_by_token("token-dup").unwrap().unwrap();
        assert_eq!(row.balance, 500, "redelivery must not re-credit");
    }
}
