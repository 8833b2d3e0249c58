// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded shard store backed by redb (pure Rust, ACID).
//!
//! ## Layout
//!
//! Every shard is its own redb table named by [`ShardName`], mapping
//! `access_token` to a serialized [`UserRecord`]. A user shard holds at
//! most one row; the aggregate shard holds the denormalized mirror of all
//! rows under the same key scheme. A fixed `processed_events` table backs
//! webhook duplicate suppression.
//!
//! ## Execution contract
//!
//! The engine talks to a shard exclusively through
//! [`ShardStore::execute`]: one parameterized [`Statement`] in, an
//! [`ExecOutcome`] (rows affected + at most one row) out. Conditional
//! updates read, test, and write inside a single write transaction, so the
//! charge admission predicate and the mutation are one atomic statement.
//! redb serializes write transactions globally, which is strictly stronger
//! than the per-shard single-writer ordering the engine relies on.

use std::path::Path;

use chrono::Utc;
use redb::{
    backends::InMemoryBackend, Database, ReadableDatabase, ReadableTable, TableDefinition,
    TableError,
};

use crate::models::UserRecord;

/// Duplicate-suppression ledger: upstream event id -> processed-at millis.
const PROCESSED_EVENTS: TableDefinition<&str, u64> = TableDefinition::new("processed_events");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Shard Naming
// =============================================================================

/// Derived name of one storage shard (also its redb table name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardName(pub String);

impl ShardName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Statements
// =============================================================================

/// One parameterized statement against a shard.
///
/// The secondary-lookup variants scan the whole table and are only
/// meaningful on the aggregate shard; user shards never hold more than one
/// row so the scan degenerates there anyway.
#[derive(Debug)]
pub enum Statement<'a> {
    /// Fetch the row keyed by this token.
    SelectByToken { access_token: &'a str },
    /// First row whose verified email equals the (normalized) argument.
    SelectByVerifiedEmail { verified_email: &'a str },
    /// First row carrying this instrument fingerprint.
    SelectByFingerprint { card_fingerprint: &'a str },
    /// Insert or replace a row under its own token.
    Insert { row: &'a UserRecord },
    /// Unconditional increment plus last-write-wins profile overwrite.
    CreditBalance {
        access_token: &'a str,
        amount: i64,
        name: Option<&'a str>,
        email: Option<&'a str>,
    },
    /// Conditional decrement: affects zero rows when the balance predicate
    /// fails, which is the sole admission-control signal.
    ChargeBalance {
        access_token: &'a str,
        amount: i64,
        allow_negative: bool,
    },
    /// Rewrite the cached public identifier.
    SetClientReferenceId {
        access_token: &'a str,
        client_reference_id: &'a str,
    },
    /// Remove the row keyed by this token.
    Delete { access_token: &'a str },
}

/// Result of one statement: rows affected and at most one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub row: Option<UserRecord>,
}

impl ExecOutcome {
    fn none() -> Self {
        Self {
            rows_affected: 0,
            row: None,
        }
    }

    fn affected(row: UserRecord) -> Self {
        Self {
            rows_affected: 1,
            row: Some(row),
        }
    }
}

// =============================================================================
// ShardStore
// =============================================================================

/// Embedded ACID store hosting every shard as a table.
pub struct ShardStore {
    db: Database,
}

impl ShardStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;
        Self::prepare(db)
    }

    /// Fully in-memory store for tests.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::prepare(db)
    }

    fn prepare(db: Database) -> StoreResult<Self> {
        // Pre-create fixed tables so read transactions never miss them
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PROCESSED_EVENTS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Quick liveness probe used by the health endpoint.
    pub fn health_check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(PROCESSED_EVENTS)?;
        Ok(())
    }

    /// Execute one statement against one shard.
    pub fn execute(&self, shard: &ShardName, stmt: Statement<'_>) -> StoreResult<ExecOutcome> {
        match stmt {
            Statement::SelectByToken { access_token } => {
                self.read_shard(shard, |table| lookup_row(table, access_token))
            }
            Statement::SelectByVerifiedEmail { verified_email } => {
                self.read_shard(shard, |table| {
                    scan_first(table, |row| {
                        row.verified_user_access_token.is_none()
                            && row.verified_email.as_deref() == Some(verified_email)
                    })
                })
            }
            Statement::SelectByFingerprint { card_fingerprint } => {
                self.read_shard(shard, |table| {
                    scan_first(table, |row| {
                        row.verified_user_access_token.is_none()
                            && row.card_fingerprint.as_deref() == Some(card_fingerprint)
                    })
                })
            }
            Statement::Insert { row } => {
                let def = TableDefinition::<&str, &[u8]>::new(shard.as_str());
                let json = serde_json::to_vec(row)?;
                let write_txn = self.db.begin_write()?;
                {
                    let mut table = write_txn.open_table(def)?;
                    table.insert(row.access_token.as_str(), json.as_slice())?;
                }
                write_txn.commit()?;
                Ok(ExecOutcome::affected(row.clone()))
            }
            Statement::CreditBalance {
                access_token,
                amount,
                name,
                email,
            } => self.update_row(shard, access_token, |row| {
                row.balance += amount;
                if let Some(name) = name {
                    row.name = Some(name.to_string());
                }
                if let Some(email) = email {
                    row.email = Some(email.to_string());
                }
                true
            }),
            Statement::ChargeBalance {
                access_token,
                amount,
                allow_negative,
            } => self.update_row(shard, access_token, |row| {
                if !allow_negative && row.balance < amount {
                    return false;
                }
                row.balance -= amount;
                true
            }),
            Statement::SetClientReferenceId {
                access_token,
                client_reference_id,
            } => self.update_row(shard, access_token, |row| {
                row.client_reference_id = client_reference_id.to_string();
                true
            }),
            Statement::Delete { access_token } => {
                let def = TableDefinition::<&str, &[u8]>::new(shard.as_str());
                let write_txn = self.db.begin_write()?;
                let removed = {
                    let mut table = write_txn.open_table(def)?;
                    let was_present = table.remove(access_token)?.is_some();
                    was_present
                };
                write_txn.commit()?;
                Ok(ExecOutcome {
                    rows_affected: u64::from(removed),
                    row: None,
                })
            }
        }
    }

    // =========================================================================
    // Processed-event ledger
    // =========================================================================

    /// Whether this upstream event id was already reconciled.
    pub fn is_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROCESSED_EVENTS)?;
        Ok(table.get(event_id)?.is_some())
    }

    /// Record an event id after its mutations committed.
    pub fn mark_event_processed(&self, event_id: &str) -> StoreResult<()> {
        let now = Utc::now().timestamp_millis() as u64;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PROCESSED_EVENTS)?;
            table.insert(event_id, now)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run a read-only closure over a shard table. A shard that was never
    /// written reads as empty, not as an error.
    fn read_shard<F>(&self, shard: &ShardName, f: F) -> StoreResult<ExecOutcome>
    where
        F: FnOnce(&redb::ReadOnlyTable<&'static str, &'static [u8]>) -> StoreResult<ExecOutcome>,
    {
        let def = TableDefinition::<&str, &[u8]>::new(shard.as_str());
        let read_txn = self.db.begin_read()?;
        match read_txn.open_table(def) {
            Ok(table) => f(&table),
            Err(TableError::TableDoesNotExist(_)) => Ok(ExecOutcome::none()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write of a single row within one write transaction. The
    /// mutator returns `false` to veto the write (predicate failed), which
    /// surfaces as zero rows affected.
    fn update_row<F>(
        &self,
        shard: &ShardName,
        access_token: &str,
        mutate: F,
    ) -> StoreResult<ExecOutcome>
    where
        F: FnOnce(&mut UserRecord) -> bool,
    {
        let def = TableDefinition::<&str, &[u8]>::new(shard.as_str());
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(def)?;

            // Read existing value and deserialize before mutating
            let existing = match table.get(access_token)? {
                Some(guard) => Some(guard.value().to_vec()),
                None => None,
            };

            match existing {
                None => ExecOutcome::none(),
                Some(bytes) => {
                    let mut row: UserRecord = serde_json::from_slice(&bytes)?;
                    if mutate(&mut row) {
                        row.updated_at = Utc::now();
                        let json = serde_json::to_vec(&row)?;
                        table.insert(access_token, json.as_slice())?;
                        ExecOutcome::affected(row)
                    } else {
                        ExecOutcome::none()
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }
}

fn lookup_row(
    table: &redb::ReadOnlyTable<&'static str, &'static [u8]>,
    access_token: &str,
) -> StoreResult<ExecOutcome> {
    match table.get(access_token)? {
        Some(guard) => {
            let row: UserRecord = serde_json::from_slice(guard.value())?;
            Ok(ExecOutcome::affected(row))
        }
        None => Ok(ExecOutcome::none()),
    }
}

fn scan_first<P>(
    table: &redb::ReadOnlyTable<&'static str, &'static [u8]>,
    predicate: P,
) -> StoreResult<ExecOutcome>
where
    P: Fn(&UserRecord) -> bool,
{
    for entry in table.range::<&str>(..)? {
        let (_, value) = entry?;
        let row: UserRecord = serde_json::from_slice(value.value())?;
        if predicate(&row) {
            return Ok(ExecOutcome::affected(row));
        }
    }
    Ok(ExecOutcome::none())
}

// =============================================================================
// Tests
// =============================================================================
