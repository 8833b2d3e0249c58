// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state: the engine components, wired once at startup
//! and cloned cheaply into every handler.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::ledger::Ledger;
use crate::providers::stripe::StripeClient;
use crate::reconcile::PaymentReconciler;
use crate::session::SessionResolver;
use crate::storage::{AggregateView, MirrorWriter, ShardStore, StoreRouter};
use crate::token::{CodecError, TokenCodec};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<ShardStore>,
    pub resolver: Arc<SessionResolver>,
    pub reconciler: Arc<PaymentReconciler>,
    pub ledger: Arc<Ledger>,
    /// Present only when provider credentials are configured.
    pub provider: Option<Arc<StripeClient>>,
}

impl AppState {
    /// Wire up the engine against an opened store. Runs the codec's key
    /// derivation once, so construction is deliberately slow.
    pub fn new(config: AppConfig, store: Arc<ShardStore>) -> Result<Self, CodecError> {
        let config = Arc::new(config);
        let codec = Arc::new(TokenCodec::new(&config.session_secret)?);
        let router = Arc::new(StoreRouter::new(
            Arc::clone(&codec),
            config.version.clone(),
            config.session_secret.clone(),
        ));
        let mirror = MirrorWriter::new(Arc::clone(&store), router.aggregate_shard());
        let aggregate = AggregateView::new(Arc::clone(&store), router.aggregate_shard());

        let resolver = Arc::new(SessionResolver::new(
            Arc::clone(&codec),
            Arc::clone(&router),
            Arc::clone(&store),
            mirror.clone(),
            config.cookie_secure,
        ));
        let ledger = Arc::new(Ledger::new(
            Arc::clone(&router),
            Arc::clone(&store),
            mirror.clone(),
            config.cookie_secure,
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            codec,
            router,
            Arc::clone(&store),
            mirror,
            Arc::clone(&ledger),
            aggregate,
        ));

        let provider = if StripeClient::is_configured() {
            match StripeClient::from_env() {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!(error = %e, "payment provider misconfigured; webhooks disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            store,
            resolver,
            reconciler,
            ledger,
            provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_wires_up_from_in_memory_store() {
        let store = Arc::new(ShardStore::in_memory().unwrap());
        let state = AppState::new(AppConfig::new("state-test-secret-123", "v1"), store).unwrap();

        let session = state.resolver.resolve(None).unwrap();
        assert!(!session.is_funded());
    }

    #[test]
    fn weak_secret_fails_construction() {
        let store = Arc::new(ShardStore::in_memory().unwrap());
        let result = AppState::new(AppConfig::new("short", "v1"), store);
        assert!(matches!(result, Err(CodecError::WeakSecret)));
    }
}
