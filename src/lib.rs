// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave Lease Server - Secret Storage Lease Market
//!
//! This crate runs the lease market that replicates encrypted secrets across
//! attested storage enclaves: it escrows deposits, assigns nodes, collects
//! signed acknowledgments and liveness reports, and repairs leases when
//! nodes die.
//!
//! ## Modules
//!
//! - `lease` - Lease engine, accounting and events (the core)
//! - `signature` - Signed node claims (secp256k1 / EIP-191)
//! - `registry` / `ledger` - Node registry and account ledger collaborators
//! - `market` - Serialization boundary: clock, engine, persistence
//! - `storage` - Lease table and audit log (redb)
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Caller authentication by signed claim
//! - `keeper` - Background sweeps and dead-node reports

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod keeper;
pub mod lease;
pub mod ledger;
pub mod market;
pub mod models;
pub mod registry;
pub mod signature;
pub mod state;
pub mod storage;
