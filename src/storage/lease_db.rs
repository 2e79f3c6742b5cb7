// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded lease database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `leases`: lease_id → serialized Lease (JSON bytes)
//! - `events`: seq → serialized EventRecord (JSON bytes)
//! - `meta`: key → u64 (`next_lease_id`, `next_event_seq`)

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::lease::{EventRecord, Lease, LeaseId};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: lease_id → serialized Lease.
const LEASES: TableDefinition<u64, &[u8]> = TableDefinition::new("leases");

/// Append-only audit log: seq → serialized EventRecord.
const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");

/// Counters that must survive a restart.
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_LEASE_ID: &str = "next_lease_id";
const NEXT_EVENT_SEQ: &str = "next_event_seq";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Everything one committed engine operation changed.
#[derive(Debug, Default)]
pub struct Changeset<'a> {
    pub upserts: Vec<&'a Lease>,
    pub deletions: Vec<LeaseId>,
    pub events: &'a [EventRecord],
    pub next_lease_id: LeaseId,
}

// =============================================================================
// LeaseDatabase
// =============================================================================

pub struct LeaseDatabase {
    db: Database,
}

impl LeaseDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LEASES)?;
            let _ = write_txn.open_table(EVENTS)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Apply one operation's changes in a single write transaction.
    pub fn commit(&self, changes: &Changeset<'_>) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut leases = write_txn.open_table(LEASES)?;
            for lease in &changes.upserts {
                let json = serde_json::to_vec(lease)?;
                leases.insert(lease.id, json.as_slice())?;
            }
            for id in &changes.deletions {
                leases.remove(*id)?;
            }

            let mut events = write_txn.open_table(EVENTS)?;
            for record in changes.events {
                let json = serde_json::to_vec(record)?;
                events.insert(record.seq, json.as_slice())?;
            }

            let mut meta = write_txn.open_table(META)?;
            meta.insert(NEXT_LEASE_ID, changes.next_lease_id)?;
            if let Some(last) = changes.events.last() {
                meta.insert(NEXT_EVENT_SEQ, last.seq + 1)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All stored leases, ordered by id.
    pub fn load_leases(&self) -> DbResult<Vec<Lease>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEASES)?;
        let mut leases = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            leases.push(serde_json::from_slice(value.value())?);
        }
        Ok(leases)
    }

    pub fn get_lease(&self, lease_id: LeaseId) -> DbResult<Option<Lease>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEASES)?;
        match table.get(lease_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Id counter, 1 on a fresh database.
    pub fn next_lease_id(&self) -> DbResult<LeaseId> {
        self.meta(NEXT_LEASE_ID)
    }

    /// Sequence number for the next appended event, 1 on a fresh database.
    pub fn next_event_seq(&self) -> DbResult<u64> {
        self.meta(NEXT_EVENT_SEQ)
    }

    /// Up to `limit` events with `seq > after`, oldest first.
    pub fn events_after(&self, after: u64, limit: usize) -> DbResult<Vec<EventRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENTS)?;
        let mut records = Vec::with_capacity(limit.min(1024));
        for entry in table.range(after.saturating_add(1)..)? {
            if records.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    fn meta(&self, key: &str) -> DbResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META)?;
        Ok(table.get(key)?.map(|v| v.value()).unwrap_or(1))
    }
}

// =============================================================================
// Tests
// =============================================================================
