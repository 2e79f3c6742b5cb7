// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated callers.
//!
//! Use the `Auth` extractor in handlers to require a signed caller:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(caller): Auth) -> impl IntoResponse {
//!     // caller is the recovered Address
//! }
//! ```

use alloy::primitives::Address;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::AuthError;
use crate::lease::LeaseError;
use crate::signature::{ClaimKind, SignedClaim};
use crate::state::AppState;

/// Fixed subject of caller-authentication claims.
pub const AUTH_SUBJECT: &str = "caller";

/// Authorization scheme name.
const SCHEME: &str = "Signature ";

/// Extractor for authenticated callers.
///
/// Reads `Authorization: Signature <timestamp>.<hexsig>`, where the signature
/// is an EIP-191 `auth` claim over subject `caller`. The recovered address is
/// the caller; it does not need to be a trusted enclave key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Auth(pub Address);

impl Auth {
    /// Require the caller to be `expected`.
    pub fn require(&self, expected: Address) -> Result<(), AuthError> {
        if self.0 == expected {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }
}

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let claim = parse_header(auth_header)?;
        let caller = state
            .authority
            .recover_fresh(
                ClaimKind::Auth,
                AUTH_SUBJECT,
                &claim,
                state.clock.now(),
                state.signature_max_age,
            )
            .map_err(|e| match e {
                LeaseError::StaleSignature { .. } => AuthError::SignatureExpired,
                LeaseError::FutureSignature { .. } => AuthError::SignatureNotYetValid,
                _ => AuthError::MalformedSignature,
            })?;

        Ok(Auth(caller))
    }
}

/// Split `Signature <timestamp>.<hexsig>` into a claim.
fn parse_header(value: &str) -> Result<SignedClaim, AuthError> {
    let credentials = value
        .strip_prefix(SCHEME)
        .ok_or(AuthError::InvalidAuthHeader)?;
    let (timestamp, signature) = credentials
        .trim()
        .split_once('.')
        .ok_or(AuthError::InvalidAuthHeader)?;
    let timestamp = timestamp
        .parse()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    Ok(SignedClaim {
        timestamp,
        signature: signature.to_string(),
    })
}

/// Header value for a caller claim, for clients and tests.
pub fn authorization_value(claim: &SignedClaim) -> String {
    format!("{SCHEME}{}.{}", claim.timestamp, claim.signature)
}
