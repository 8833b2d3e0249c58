// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tollgate_server::{api::router, config::AppConfig, state::AppState, storage::ShardStore};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    let store = Arc::new(
        ShardStore::open(&config.data_dir.join("tollgate.redb")).expect("Failed to open shard store"),
    );
    let state = AppState::new(config, store).expect("Failed to initialize engine");

    if state.provider.is_none() {
        tracing::warn!("payment provider not configured; webhook intake disabled");
    }

    let app = router(state);

    // Graceful shutdown: ctrl-c trips the token, axum drains in-flight
    // requests, mirror writes already issued are allowed to complete.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!(%addr, "Tollgate server listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .expect("Server failed");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
