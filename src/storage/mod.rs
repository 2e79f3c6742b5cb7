// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Durable Storage
//!
//! The lease table and the event log are persisted in a single embedded
//! redb file under `DATA_DIR`.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   leases.redb     # leases, events, meta tables
//! ```
//!
//! ## Important Notes
//!
//! - The in-memory engine is authoritative; the database is written after
//!   each committed operation and read back once at startup
//! - Registry and ledger state belong to external systems and are not stored

pub mod lease_db;

pub use lease_db::{Changeset, DbError, DbResult, LeaseDatabase};

/// File name of the lease database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "leases.redb";
