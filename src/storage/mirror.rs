// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Best-effort replication into the aggregate mirror shard.
//!
//! Every mutation of a user's private shard is followed by an explicit
//! [`MirrorWriter::replicate`] call carrying the post-write row (or a
//! delete). The two writes are *not* cross-shard atomic: a replicate
//! failure is logged and swallowed, leaving the aggregate transiently (or,
//! on a crash, permanently) stale. The engine only ever uses the aggregate
//! for addressing and payer correlation, never for charging, so divergence
//! degrades merge quality rather than correctness of balances.

use std::sync::Arc;

use tracing::warn;

use crate::models::{AccessToken, UserRecord};

use super::shard::{ShardName, ShardStore, Statement};

/// One replication instruction for the aggregate shard.
#[derive(Debug, Clone)]
pub enum MirrorOp {
    /// Upsert the full denormalized row.
    Upsert(UserRecord),
    /// Remove the row for a retired credential.
    Delete(AccessToken),
}

/// Writer applying mirror ops to the aggregate shard, fire-and-forget.
#[derive(Clone)]
pub struct MirrorWriter {
    store: Arc<ShardStore>,
    shard: ShardName,
}

impl MirrorWriter {
    pub fn new(store: Arc<ShardStore>, shard: ShardName) -> Self {
        Self { store, shard }
    }

    /// Apply one op to the aggregate. Never fails the caller: a mirror
    /// fault is logged with the shard name so operators can re-sync.
    pub fn replicate(&self, op: MirrorOp) {
        let result = match &op {
            MirrorOp::Upsert(row) => self
                .store
                .execute(&self.shard, Statement::Insert { row })
                .map(|_| ()),
            MirrorOp::Delete(token) => self
                .store
                .execute(
                    &self.shard,
                    Statement::Delete {
                        access_token: token.as_str(),
                    },
                )
                .map(|_| ()),
        };

        if let Err(e) = result {
            warn!(
                shard = %self.shard,
                error = %e,
                "aggregate mirror write failed; mirror is now stale"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AggregateView;

    #[test]
    fn upsert_then_delete_round_trips_through_aggregate() {
        let store = Arc::new(ShardStore::in_memory().unwrap());
        let shard = ShardName("v1-aggregate".to_string());
        let mirror = MirrorWriter::new(Arc::clone(&store), shard.clone());
        let view = AggregateView::new(Arc::clone(&store), shard);

        let mut row = UserRecord::new_anonymous("tok-m".into(), "pid-m".into());
        row.balance = 700;
        mirror.replicate(MirrorOp::Upsert(row));

        let found = view.find_by_token("tok-m").unwrap().unwrap();
        assert_eq!(found.balance, 700);

        mirror.replicate(MirrorOp::Delete("tok-m".into()));
        assert!(view.find_by_token("tok-m").unwrap().is_none());
    }
}
