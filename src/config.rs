// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup and then
//! threaded explicitly into every constructor that needs it. Nothing in the
//! engine reads the environment after boot, so tests can run several
//! independent configurations side by side.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SESSION_SECRET` | Master secret for the token codec (min 16 chars) | Required |
//! | `DEPLOY_VERSION` | Version tag partitioning all shard names | `v1` |
//! | `DATA_DIR` | Directory for the embedded shard database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `COOKIE_SECURE` | Set `false` to drop the Secure cookie attribute | `true` |
//! | `STRIPE_SECRET_KEY` | Provider API key (enables charge detail lookups) | Optional |
//! | `STRIPE_WEBHOOK_SECRET` | Provider webhook signing secret | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;

/// Minimum length accepted for the master session secret.
pub const MIN_SECRET_LEN: usize = 16;

/// Default version tag. Changing the tag renames every shard, which
/// effectively resets all stored identities.
pub const DEFAULT_VERSION: &str = "v1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("SESSION_SECRET must be at least {MIN_SECRET_LEN} characters")]
    WeakSecret,

    #[error("PORT is not a valid port number: {0}")]
    InvalidPort(String),
}

/// Application configuration, built once and shared via `Arc`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Master secret feeding the token codec key derivation.
    pub session_secret: String,
    /// Version tag prefixed onto every shard name.
    pub version: String,
    /// Directory holding the embedded shard database file.
    pub data_dir: PathBuf,
    /// Server bind address.
    pub host: String,
    /// Server bind port.
    pub port: u16,
    /// Whether the credential cookie carries the Secure attribute.
    pub cookie_secure: bool,
}

impl AppConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_secret =
            env_optional("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;
        if session_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let port_raw = env_or_default("PORT", "8080");
        let port: u16 = port_raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port_raw))?;

        Ok(Self {
            session_secret,
            version: env_or_default("DEPLOY_VERSION", DEFAULT_VERSION),
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "/data")),
            host: env_or_default("HOST", "0.0.0.0"),
            port,
            cookie_secure: env_or_default("COOKIE_SECURE", "true") != "false",
        })
    }

    /// Construct a configuration directly (tests and embedding).
    pub fn new(session_secret: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            session_secret: session_secret.into(),
            version: version.into(),
            data_dir: PathBuf::from("/data"),
            host: "0.0.0.0".to_string(),
            port: 8080,
            cookie_secure: true,
        }
    }
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
