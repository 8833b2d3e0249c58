// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Store Router
//!
//! Maps a public identifier onto the shard holding that identity's row,
//! together with the secret required to operate on it:
//!
//! - the distinguished [`AGGREGATE_PUBLIC_ID`] routes to the fixed
//!   aggregate shard under the master secret;
//! - any other identifier routes to `"{version}-user-{public_id}"`, and
//!   the shard secret is the *decoded raw token itself* — knowledge of the
//!   raw token already implies authorization to view that shard.
//!
//! A public identifier that does not decode propagates
//! [`CodecError::Decode`]; callers must treat that as "not authorized" and
//! never surface the decode detail.
//!
//! Every shard name is prefixed with the configured version tag, so
//! bumping the tag re-partitions the whole keyspace (an effective reset).

use std::sync::Arc;

use crate::models::{AccessToken, UserRecord};
use crate::token::{CodecError, TokenCodec};

use super::shard::{ExecOutcome, ShardName, ShardStore, Statement, StoreResult};

/// Distinguished identifier for the aggregate shard. Can never collide
/// with a codec output: codec outputs are base64url of at least 28 bytes.
pub const AGGREGATE_PUBLIC_ID: &str = "aggregate";

/// A routed shard: its derived name plus the secret that grants access.
#[derive(Debug, Clone)]
pub struct ShardRoute {
    pub name: ShardName,
    pub secret: String,
}

/// Router from public identifiers to shard routes.
pub struct StoreRouter {
    codec: Arc<TokenCodec>,
    version: String,
    master_secret: String,
}

impl StoreRouter {
    pub fn new(codec: Arc<TokenCodec>, version: impl Into<String>, master_secret: impl Into<String>) -> Self {
        Self {
            codec,
            version: version.into(),
            master_secret: master_secret.into(),
        }
    }

    /// Route a public identifier to its shard.
    pub fn route(&self, public_id: &str) -> Result<ShardRoute, CodecError> {
        if public_id == AGGREGATE_PUBLIC_ID {
            return Ok(self.aggregate_route());
        }
        let token = self.codec.decode(public_id)?;
        Ok(ShardRoute {
            name: ShardName(format!("{}-user-{}", self.version, public_id)),
            secret: token.0,
        })
    }

    /// Route a raw credential (encodes it first). Returns the route and
    /// the freshly computed public identifier.
    pub fn route_token(&self, token: &AccessToken) -> Result<(ShardRoute, String), CodecError> {
        let public_id = self.codec.encode(token)?;
        let route = ShardRoute {
            name: ShardName(format!("{}-user-{}", self.version, public_id)),
            secret: token.0.clone(),
        };
        Ok((route, public_id))
    }

    fn aggregate_route(&self) -> ShardRoute {
        ShardRoute {
            name: ShardName(format!("{}-aggregate", self.version)),
            secret: self.master_secret.clone(),
        }
    }

    /// Name of the aggregate shard under the current version tag.
    pub fn aggregate_shard(&self) -> ShardName {
        self.aggregate_route().name
    }
}

// =============================================================================
// Typed handles
// =============================================================================

/// Handle to one identity's private shard: the store plus its route.
///
/// The route's secret doubles as the row key (it *is* the raw access
/// token), so every operation here addresses the single row the shard may
/// hold.
#[derive(Clone)]
pub struct UserShard {
    store: Arc<ShardStore>,
    route: ShardRoute,
}

impl UserShard {
    pub fn new(store: Arc<ShardStore>, route: ShardRoute) -> Self {
        Self { store, route }
    }

    pub fn name(&self) -> &ShardName {
        &self.route.name
    }

    pub fn access_token(&self) -> &str {
        &self.route.secret
    }

    pub fn get(&self) -> StoreResult<Option<UserRecord>> {
        let outcome = self.store.execute(
            &self.route.name,
            Statement::SelectByToken {
                access_token: &self.route.secret,
            },
        )?;
        Ok(outcome.row)
    }

    pub fn insert(&self, row: &UserRecord) -> StoreResult<UserRecord> {
        let outcome = self.store.execute(&self.route.name, Statement::Insert { row })?;
        Ok(outcome.row.unwrap_or_else(|| row.clone()))
    }

    pub fn credit(
        &self,
        amount: i64,
        name: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<ExecOutcome> {
        self.store.execute(
            &self.route.name,
            Statement::CreditBalance {
                access_token: &self.route.secret,
                amount,
                name,
                email,
            },
        )
    }

    pub fn charge(&self, amount: i64, allow_negative: bool) -> StoreResult<ExecOutcome> {
        self.store.execute(
            &self.route.name,
            Statement::ChargeBalance {
                access_token: &self.route.secret,
                amount,
                allow_negative,
            },
        )
    }

    pub fn set_client_reference_id(&self, client_reference_id: &str) -> StoreResult<ExecOutcome> {
        self.store.execute(
            &self.route.name,
            Statement::SetClientReferenceId {
                access_token: &self.route.secret,
                client_reference_id,
            },
        )
    }

    pub fn delete(&self) -> StoreResult<ExecOutcome> {
        self.store.execute(
            &self.route.name,
            Statement::Delete {
                access_token: &self.route.secret,
            },
        )
    }
}

/// Read-only view over the aggregate mirror shard.
#[derive(Clone)]
pub struct AggregateView {
    store: Arc<ShardStore>,
    shard: ShardName,
}

impl AggregateView {
    pub fn new(store: Arc<ShardStore>, shard: ShardName) -> Self {
        Self { store, shard }
    }

    pub fn find_by_token(&self, access_token: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .store
            .execute(&self.shard, Statement::SelectByToken { access_token })?
            .row)
    }

    pub fn find_by_verified_email(&self, verified_email: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .store
            .execute(&self.shard, Statement::SelectByVerifiedEmail { verified_email })?
            .row)
    }

    pub fn find_by_fingerprint(&self, card_fingerprint: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .store
            .execute(&self.shard, Statement::SelectByFingerprint { card_fingerprint })?
            .row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenCodec;

    const SECRET: &str = "router-testing-secret";

    fn router() -> StoreRouter {
        let codec = Arc::new(TokenCodec::new(SECRET).unwrap());
        StoreRouter::new(codec, "v1", SECRET)
    }

    #[test]
    fn aggregate_identifier_routes_to_fixed_shard() {
        let router = router();
        let route = router.route(AGGREGATE_PUBLIC_ID).unwrap();
        assert_eq!(route.name.as_str(), "v1-aggregate");
        assert_eq!(route.secret, SECRET);
    }

    #[test]
    fn user_route_embeds_public_id_and_recovers_token() {
        let codec = Arc::new(TokenCodec::new(SECRET).unwrap());
        let router = StoreRouter::new(Arc::clone(&codec), "v2", SECRET);

        let token = AccessToken::from("some-user-token");
        let public_id = codec.encode(&token).unwrap();

        let route = router.route(&public_id).unwrap();
        assert_eq!(route.name.as_str(), format!("v2-user-{public_id}"));
        // The shard secret is the decoded raw token
        assert_eq!(route.secret, "some-user-token");
    }

    #[test]
    fn invalid_public_id_propagates_decode_error() {
        let router = router();
        assert!(matches!(
            router.route("definitely-not-a-codec-output"),
            Err(CodecError::Decode)
        ));
    }

    #[test]
    fn route_token_matches_route_by_public_id() {
        let router = router();
        let token = AccessToken::mint();
        let (route, public_id) = router.route_token(&token).unwrap();
        let rerouted = router.route(&public_id).unwrap();
        assert_eq!(route.name, rerouted.name);
        assert_eq!(route.secret, rerouted.secret);
    }

    #[test]
    fn version_tag_partitions_shard_names() {
        let codec = Arc::new(TokenCodec::new(SECRET).unwrap());
        let old = StoreRouter::new(Arc::clone(&codec), "v1", SECRET);
        let new = StoreRouter::new(codec, "v2", SECRET);

        let token = AccessToken::mint();
        let (old_route, _) = old.route_token(&token).unwrap();
        let (new_route, _) = new.route_token(&token).unwrap();
        assert_ne!(old_route.name, new_route.name);
    }
}
