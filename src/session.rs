// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Resolver
//!
//! Turns an inbound request credential into a concrete user record.
//!
//! The resolver never errors toward the caller for anything a client could
//! have caused: a missing credential, a tampered cookie, and a
//! never-funded identity all resolve identically to a fresh, *unpersisted*
//! zero-balance identity. Nothing is written for such an identity until a
//! payment confirms it.
//!
//! When a stored row carries a forwarding pointer, resolution follows it
//! exactly once and uses the target as the effective user for the rest of
//! the request. A pointer-to-a-pointer is not chased further; the
//! condition is logged so multi-merge chains are visible to operators.
//!
//! Resolution also self-heals rotated secrets: the public identifier is
//! recomputed from the effective credential on every pass, and a stale
//! stored `client_reference_id` is rewritten in place — no migration pass
//! is ever needed after a secret rotation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::models::{AccessToken, CookieDirective, Identity, UserRecord};
use crate::storage::{MirrorOp, MirrorWriter, ShardStore, StoreRouter, UserShard};
use crate::token::TokenCodec;

/// Outcome of resolving a request credential.
pub struct ResolvedSession {
    /// The effective user record (possibly not yet persisted).
    pub user: UserRecord,
    /// Handle to the user's private shard; absent while unpersisted.
    pub shard: Option<UserShard>,
    /// Cookie refresh directive, produced on every resolution.
    pub cookie: CookieDirective,
}

impl ResolvedSession {
    /// Whether a backing row exists for this identity.
    pub fn is_funded(&self) -> bool {
        self.shard.is_some()
    }
}

pub struct SessionResolver {
    codec: Arc<TokenCodec>,
    router: Arc<StoreRouter>,
    store: Arc<ShardStore>,
    mirror: MirrorWriter,
    cookie_secure: bool,
}

impl SessionResolver {
    pub fn new(
        codec: Arc<TokenCodec>,
        router: Arc<StoreRouter>,
        store: Arc<ShardStore>,
        mirror: MirrorWriter,
        cookie_secure: bool,
    ) -> Self {
        Self {
            codec,
            router,
            store,
            mirror,
            cookie_secure,
        }
    }

    /// Resolve an inbound credential to the effective user.
    pub fn resolve(&self, credential: Option<&str>) -> Result<ResolvedSession, CoreError> {
        let presented = credential.map(str::trim).filter(|c| !c.is_empty());
        let Some(raw) = presented else {
            return self.fresh_identity();
        };

        let (record, shard) = match self.lookup(&AccessToken::from(raw)) {
            Ok(Some(found)) => found,
            Ok(None) => return self.fresh_identity(),
            Err(e) => {
                // A lookup fault is indistinguishable from a bad credential
                // to the caller; both bootstrap a new anonymous identity.
                debug!(error = %e, "credential lookup failed; minting fresh identity");
                return self.fresh_identity();
            }
        };

        let (effective, shard) = match record.identity() {
            Identity::Primary(record) => (record, shard),
            Identity::Redirect(target) => match self.lookup(&target) {
                Ok(Some((target_record, target_shard))) => {
                    if target_record.verified_user_access_token.is_some() {
                        warn!("forwarding pointer target is itself a redirect; stopping after one hop");
                    }
                    (target_record, target_shard)
                }
                Ok(None) => {
                    warn!("forwarding pointer dangles; minting fresh identity");
                    return self.fresh_identity();
                }
                Err(e) => {
                    debug!(error = %e, "redirect lookup failed; minting fresh identity");
                    return self.fresh_identity();
                }
            },
        };

        let effective = self.heal_client_reference_id(effective, &shard)?;
        let cookie = CookieDirective::for_credential(&effective.access_token, self.cookie_secure);

        Ok(ResolvedSession {
            user: effective,
            shard: Some(shard),
            cookie,
        })
    }

    /// Bootstrap an unpersisted identity with a fresh random credential.
    fn fresh_identity(&self) -> Result<ResolvedSession, CoreError> {
        let token = AccessToken::mint();
        let public_id = self.codec.encode(&token)?;
        let cookie = CookieDirective::for_credential(&token, self.cookie_secure);
        Ok(ResolvedSession {
            user: UserRecord::new_anonymous(token, public_id),
            shard: None,
            cookie,
        })
    }

    /// Route a raw credential to its shard and fetch the single row.
    fn lookup(&self, token: &AccessToken) -> Result<Option<(UserRecord, UserShard)>, CoreError> {
        let (route, _) = self.router.route_token(token)?;
        let shard = UserShard::new(Arc::clone(&self.store), route);
        match shard.get()? {
            Some(record) => Ok(Some((record, shard))),
            None => Ok(None),
        }
    }

    /// Rewrite a stale stored public identifier under the current secret.
    fn heal_client_reference_id(
        &self,
        record: UserRecord,
        shard: &UserShard,
    ) -> Result<UserRecord, CoreError> {
        let current = self.codec.encode(&record.access_token)?;
        if record.client_reference_id == current {
            return Ok(record);
        }

        debug!(shard = %shard.name(), "rewriting stale client_reference_id");
        let outcome = shard.set_client_reference_id(&current)?;
        let healed = outcome.row.ok_or_else(|| {
            CoreError::DataCorruption(
                "row vanished while rewriting its public identifier".to_string(),
            )
        })?;
        self.mirror.replicate(MirrorOp::Upsert(healed.clone()));
        Ok(healed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CREDENTIAL_COOKIE;
    use crate::storage::AggregateView;

    const SECRET: &str = "session-resolver-secret";

    struct Harness {
        codec: Arc<TokenCodec>,
        router: Arc<StoreRouter>,
        store: Arc<ShardStore>,
        resolver: SessionResolver,
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
        Harness {
            codec,
            router,
            store,
            resolver,
            aggregate,
        }
    }

    impl Harness {
        fn persist(&self, record: &UserRecord) {
            let (route, _) = self.router.route_token(&record.access_token).unwrap();
            UserShard::new(Arc::clone(&self.store), route)
                .insert(record)
                .unwrap();
            MirrorWriter::new(Arc::clone(&self.store), self.router.aggregate_shard())
                .replicate(MirrorOp::Upsert(record.clone()));
        }

        fn funded_user(&self, token: &str, balance: i64) -> UserRecord {
            let access_token = AccessToken::from(token);
            let public_id = self.codec.encode(&access_token).unwrap();
            let mut record = UserRecord::new_anonymous(access_token, public_id);
            record.balance = balance;
            self.persist(&record);
            record
        }
    }

    #[test]
    fn no_credential_mints_fresh_unpersisted_identity() {
        let h = harness();
        let session = h.resolver.resolve(None).unwrap();

        assert!(!session.is_funded());
        assert_eq!(session.user.balance, 0);
        assert!(session.user.email.is_none());
        assert_eq!(session.cookie.name, CREDENTIAL_COOKIE);
        assert_eq!(session.cookie.value, session.user.access_token.0);
        // Public identifier is consistent with the minted credential
        assert_eq!(
            h.codec.encode(&session.user.access_token).unwrap(),
            session.user.client_reference_id
        );
    }

    #[test]
    fn unknown_credential_falls_back_to_fresh_identity() {
        let h = harness();
        let session = h.resolver.resolve(Some("never-funded-token")).unwrap();

        assert!(!session.is_funded());
        assert_eq!(session.user.balance, 0);
        // A fresh credential is minted; the presented one is abandoned
        assert_ne!(session.user.access_token.as_str(), "never-funded-token");
        assert_eq!(session.cookie.value, session.user.access_token.0);
    }

    #[test]
    fn blank_credential_is_treated_as_absent() {
        let h = harness();
        let session = h.resolver.resolve(Some("   ")).unwrap();
        assert!(!session.is_funded());
    }

    #[test]
    fn funded_credential_resolves_to_its_row() {
        let h = harness();
        h.funded_user("funded-token", 1200);

        let session = h.resolver.resolve(Some("funded-token")).unwrap();
        assert!(session.is_funded());
        assert_eq!(session.user.balance, 1200);
        assert_eq!(session.user.access_token.as_str(), "funded-token");
        assert_eq!(session.cookie.value, "funded-token");
    }

    #[test]
    fn forwarding_pointer_is_followed_one_hop() {
        let h = harness();
        let primary = h.funded_user("primary-token", 800);

        let secondary = AccessToken::from("secondary-token");
        let public_id = h.codec.encode(&secondary).unwrap();
        let stub = UserRecord::new_redirect(secondary, public_id, primary.access_token.clone());
        h.persist(&stub);

        let session = h.resolver.resolve(Some("secondary-token")).unwrap();
        assert_eq!(session.user.access_token.as_str(), "primary-token");
        assert_eq!(session.user.balance, 800);
        // The cookie is rewritten to the effective credential
        assert_eq!(session.cookie.value, "primary-token");
    }

    #[test]
    fn dangling_pointer_falls_back_to_fresh_identity() {
        let h = harness();
        let secondary = AccessToken::from("orphan-stub");
        let public_id = h.codec.encode(&secondary).unwrap();
        let stub = UserRecord::new_redirect(secondary, public_id, "rotated-away".into());
        h.persist(&stub);

        let session = h.resolver.resolve(Some("orphan-stub")).unwrap();
        assert!(!session.is_funded());
        assert_ne!(session.user.access_token.as_str(), "orphan-stub");
    }

    #[test]
    fn stale_client_reference_id_is_healed_in_place() {
        let h = harness();
        let access_token = AccessToken::from("stale-pid-token");
        let mut record =
            UserRecord::new_anonymous(access_token.clone(), "old-secret-output".to_string());
        record.balance = 450;
        h.persist(&record);

        let session = h.resolver.resolve(Some("stale-pid-token")).unwrap();
        let expected = h.codec.encode(&access_token).unwrap();
        assert_eq!(session.user.client_reference_id, expected);
        assert_eq!(session.user.balance, 450);
        assert_eq!(session.user.access_token, access_token);

        // The correction was written back to the shard and the mirror
        let stored = session.shard.as_ref().unwrap().get().unwrap().unwrap();
        assert_eq!(stored.client_reference_id, expected);
        let mirrored = h.aggregate.find_by_token("stale-pid-token").unwrap().unwrap();
        assert_eq!(mirrored.client_reference_id, expected);
    }

    #[test]
    fn fresh_identities_are_not_written_anywhere() {
        let h = harness();
        let session = h.resolver.resolve(Some("drive-by-token")).unwrap();

        // Neither the presented nor the minted credential gained a row
        assert!(h.aggregate.find_by_token("drive-by-token").unwrap().is_none());
        assert!(h
            .aggregate
            .find_by_token(session.user.access_token.as_str())
            .unwrap()
            .is_none());
    }
}
