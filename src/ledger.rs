// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Operations
//!
//! The three balance primitives:
//!
//! - **charge** — conditional decrement. Admission control is the
//!   statement itself: zero rows affected means the predicate refused the
//!   spend. There is no reservation or lock step.
//! - **credit** — unconditional increment used by the reconciler.
//! - **rotate** — identity migration with copy-then-delete semantics. A
//!   failed copy cleans up after itself; a failed delete after a good copy
//!   leaves two funded rows for one payer, which is accepted as a rare,
//!   manually-recoverable state and logged loudly.

use std::sync::Arc;

use tracing::error;

use crate::error::CoreError;
use crate::models::{AccessToken, CookieDirective, UserRecord};
use crate::session::ResolvedSession;
use crate::storage::{MirrorOp, MirrorWriter, ShardStore, StoreRouter, UserShard};

/// Result of a credential rotation.
pub struct RotationOutcome {
    /// The migrated row, now keyed by the new credential.
    pub user: UserRecord,
    /// Directive delivering the new credential to the browser. The cookie
    /// header is the only channel a cookie-based client learns the raw
    /// value from.
    pub cookie: CookieDirective,
}

pub struct Ledger {
    router: Arc<StoreRouter>,
    store: Arc<ShardStore>,
    mirror: MirrorWriter,
    cookie_secure: bool,
}

impl Ledger {
    pub fn new(
        router: Arc<StoreRouter>,
        store: Arc<ShardStore>,
        mirror: MirrorWriter,
        cookie_secure: bool,
    ) -> Self {
        Self {
            router,
            store,
            mirror,
            cookie_secure,
        }
    }

    /// Conditionally decrement a balance. `amount_cents` must be positive
    /// (validated at the API boundary).
    ///
    /// Fails with [`CoreError::NotFunded`] when the identity has no
    /// backing row, and [`CoreError::InsufficientBalance`] when the
    /// predicate refused the decrement.
    pub fn charge(
        &self,
        shard: Option<&UserShard>,
        amount_cents: i64,
        allow_negative: bool,
    ) -> Result<UserRecord, CoreError> {
        let shard = shard.ok_or(CoreError::NotFunded)?;
        let outcome = shard.charge(amount_cents, allow_negative)?;
        if outcome.rows_affected == 0 {
            return Err(CoreError::InsufficientBalance);
        }
        let row = outcome.row.ok_or_else(|| {
            CoreError::DataCorruption("charge affected a row but returned none".to_string())
        })?;
        self.mirror.replicate(MirrorOp::Upsert(row.clone()));
        Ok(row)
    }

    /// Unconditionally increment a balance, overwriting the payer profile
    /// (last write wins). The row must exist.
    pub fn credit(
        &self,
        shard: &UserShard,
        amount_cents: i64,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<UserRecord, CoreError> {
        let outcome = shard.credit(amount_cents, name, email)?;
        if outcome.rows_affected == 0 {
            return Err(CoreError::DataCorruption(format!(
                "credit target row missing in shard {}",
                shard.name()
            )));
        }
        let row = outcome.row.ok_or_else(|| {
            CoreError::DataCorruption("credit affected a row but returned none".to_string())
        })?;
        self.mirror.replicate(MirrorOp::Upsert(row.clone()));
        Ok(row)
    }

    /// Migrate an identity onto a fresh random credential.
    ///
    /// Copies every ledger-relevant column into a row addressed by the new
    /// credential's shard, resets the forwarding pointer, then deletes the
    /// old row.
    pub fn rotate(&self, session: &ResolvedSession) -> Result<RotationOutcome, CoreError> {
        let old_shard = session.shard.as_ref().ok_or(CoreError::NotFunded)?;
        let old_row = old_shard.get()?.ok_or(CoreError::NotFunded)?;
        let old_token = old_row.access_token.clone();

        let new_token = AccessToken::mint();
        let (new_route, new_public_id) = self.router.route_token(&new_token)?;
        let new_shard = UserShard::new(Arc::clone(&self.store), new_route);

        let mut new_row = old_row;
        new_row.access_token = new_token.clone();
        new_row.client_reference_id = new_public_id;
        new_row.verified_user_access_token = None;
        new_row.updated_at = chrono::Utc::now();

        if let Err(copy_err) = new_shard.insert(&new_row) {
            // Never leave an orphaned new identity behind a failed copy.
            if let Err(cleanup_err) = new_shard.delete() {
                error!(
                    shard = %new_shard.name(),
                    error = %cleanup_err,
                    "failed to clean up partially created identity after copy failure"
                );
            }
            return Err(copy_err.into());
        }

        if let Err(delete_err) = old_shard.delete() {
            // Two funded rows for one payer: accepted, manually recoverable.
            error!(
                old_shard = %old_shard.name(),
                new_shard = %new_shard.name(),
                error = %delete_err,
                "rotation copy succeeded but old row deletion failed; duplicate identity remains"
            );
        }

        self.mirror.replicate(MirrorOp::Upsert(new_row.clone()));
        self.mirror.replicate(MirrorOp::Delete(old_token));

        let cookie = CookieDirective::for_credential(&new_token, self.cookie_secure);
        Ok(RotationOutcome {
            user: new_row,
            cookie,
        })
    }
}
