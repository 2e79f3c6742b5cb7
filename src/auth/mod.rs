// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Callers prove their identity with a signed claim instead of a session.
//!
//! ## Auth Flow
//!
//! 1. Client signs the EIP-191 message `enclave-lease:auth:caller:{timestamp}`
//!    with its secp256k1 key
//! 2. Client sends `Authorization: Signature <timestamp>.<hex signature>`
//! 3. Server:
//!    - Rejects timestamps older than `SIGNATURE_MAX_AGE` or in the future
//!    - Recovers the signer address, which becomes the caller identity
//!
//! ## Security
//!
//! - Lease creation, end-time updates and node registration require a caller
//! - The message domain tag keeps auth claims from being replayed as node
//!   acknowledgments or liveness reports
//! - Node operations carry their own signed claims in the request body

pub mod error;
pub mod extractor;

pub use error::AuthError;
pub use extractor::{authorization_value, Auth, AUTH_SUBJECT};
