// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed claims from enclave nodes and clients.
//!
//! A claim is a capability token: a signature over `(kind, subject, timestamp)`
//! made with a secp256k1 key. Enclave nodes sign acknowledgments and liveness
//! pings with the key their attested image generated, so the recovered signer
//! address *is* the node identity. Clients sign `auth` claims to prove who is
//! calling owner-only endpoints.
//!
//! ## Message Format
//!
//! ```text
//! enclave-lease:{kind}:{subject}:{timestamp}
//! ```
//!
//! signed as an EIP-191 personal message. The curve lives behind
//! [`ClaimVerifier`], so the engine only ever sees "message, signature ->
//! signer".

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Signature};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::lease::{LeaseError, Timestamp};
use crate::registry::NodeRegistry;

/// Domain tag separating claims that share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Acknowledge,
    Alive,
    Register,
    Auth,
}

impl ClaimKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ClaimKind::Acknowledge => "ack",
            ClaimKind::Alive => "alive",
            ClaimKind::Register => "register",
            ClaimKind::Auth => "auth",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Timestamp and hex signature presented with a claim.
///
/// The subject is never taken from the wire; the operation receiving the
/// claim supplies it, so a signature cannot be replayed against another lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SignedClaim {
    /// Unix seconds at signing time.
    pub timestamp: u64,
    /// 65-byte `r || s || v` signature, hex encoded (0x prefix optional).
    pub signature: String,
}

/// Canonical message text for a claim.
pub fn claim_message(kind: ClaimKind, subject: &str, timestamp: Timestamp) -> String {
    format!("enclave-lease:{}:{subject}:{timestamp}", kind.tag())
}

/// Canonical subject text for an address (lowercase, 0x-prefixed).
pub fn address_subject(address: Address) -> String {
    format!("{address:#x}")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid hex: {0}")]
    Encoding(String),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("signer recovery failed: {0}")]
    Recovery(String),
}

/// Recovers the signer of a message. Abstracts the signature scheme.
pub trait ClaimVerifier: Send + Sync {
    fn recover(&self, message: &[u8], signature: &[u8]) -> Result<Address, SignatureError>;
}

/// secp256k1 ECDSA over EIP-191 personal messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eip191Verifier;

impl ClaimVerifier for Eip191Verifier {
    fn recover(&self, message: &[u8], signature: &[u8]) -> Result<Address, SignatureError> {
        let signature = Signature::from_raw(signature)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        signature
            .recover_address_from_msg(message)
            .map_err(|e| SignatureError::Recovery(e.to_string()))
    }
}

/// Verifies freshness and origin of signed claims.
#[derive(Clone)]
pub struct SignatureAuthority {
    verifier: Arc<dyn ClaimVerifier>,
}

impl fmt::Debug for SignatureAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureAuthority").finish_non_exhaustive()
    }
}

impl Default for SignatureAuthority {
    fn default() -> Self {
        Self::new(Arc::new(Eip191Verifier))
    }
}

impl SignatureAuthority {
    pub fn new(verifier: Arc<dyn ClaimVerifier>) -> Self {
        Self { verifier }
    }

    /// Recover the signer of a claim no older than `max_age` seconds.
    pub fn recover_fresh(
        &self,
        kind: ClaimKind,
        subject: &str,
        claim: &SignedClaim,
        now: Timestamp,
        max_age: u64,
    ) -> Result<Address, LeaseError> {
        if claim.timestamp > now {
            return Err(LeaseError::FutureSignature {
                timestamp: claim.timestamp,
            });
        }
        let age = now - claim.timestamp;
        if age > max_age {
            return Err(LeaseError::StaleSignature { age, max_age });
        }

        let raw = alloy::hex::decode(claim.signature.trim())
            .map_err(|e| SignatureError::Encoding(e.to_string()))?;
        let message = claim_message(kind, subject, claim.timestamp);
        Ok(self.verifier.recover(message.as_bytes(), &raw)?)
    }

    /// Recover a fresh claim and require a currently trusted enclave signer.
    pub fn verify_node_claim<R: NodeRegistry + ?Sized>(
        &self,
        kind: ClaimKind,
        subject: &str,
        claim: &SignedClaim,
        now: Timestamp,
        registry: &R,
    ) -> Result<Address, LeaseError> {
        let signer = self.recover_fresh(kind, subject, claim, now, registry.signature_max_age())?;
        if !registry.is_verified_signer(signer) {
            return Err(LeaseError::UnverifiedSigner(signer));
        }
        Ok(signer)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{sign_claim, signer};
    use super::*;
    use crate::registry::InMemoryRegistry;

    #[test]
    fn message_is_canonical() {
        assert_eq!(
            claim_message(ClaimKind::Acknowledge, "42", 1_700_000_000),
            "enclave-lease:ack:42:1700000000"
        );
        let subject = address_subject(Address::repeat_byte(0xab));
        assert_eq!(subject, format!("0x{}", "ab".repeat(20)));
    }

    #[test]
    fn recovers_the_signing_key() {
        let key = signer(1);
        let claim = sign_claim(&key, ClaimKind::Alive, "node", 1_000);

        let authority = SignatureAuthority::default();
        let recovered = authority
            .recover_fresh(ClaimKind::Alive, "node", &claim, 1_010, 60)
            .unwrap();
        assert_eq!(recovered, key.address());
    }

    #[test]
    fn other_subject_or_kind_recovers_someone_else() {
        let key = signer(2);
        let claim = sign_claim(&key, ClaimKind::Acknowledge, "1", 1_000);
        let authority = SignatureAuthority::default();

        let other_subject = authority
            .recover_fresh(ClaimKind::Acknowledge, "2", &claim, 1_000, 60)
            .unwrap();
        assert_ne!(other_subject, key.address());

        let other_kind = authority
            .recover_fresh(ClaimKind::Alive, "1", &claim, 1_000, 60)
            .unwrap();
        assert_ne!(other_kind, key.address());
    }

    #[test]
    fn rejects_stale_and_future_claims() {
        let key = signer(3);
        let claim = sign_claim(&key, ClaimKind::Alive, "x", 1_000);
        let authority = SignatureAuthority::default();

        let stale = authority.recover_fresh(ClaimKind::Alive, "x", &claim, 1_061, 60);
        assert!(matches!(
            stale,
            Err(LeaseError::StaleSignature {
                age: 61,
                max_age: 60
            })
        ));

        let future = authority.recover_fresh(ClaimKind::Alive, "x", &claim, 999, 60);
        assert!(matches!(future, Err(LeaseError::FutureSignature { .. })));
    }

    #[test]
    fn rejects_garbage_signatures() {
        let authority = SignatureAuthority::default();
        let claim = SignedClaim {
            timestamp: 5,
            signature: "0xzz".to_string(),
        };
        let result = authority.recover_fresh(ClaimKind::Auth, "caller", &claim, 5, 60);
        assert!(matches!(
            result,
            Err(LeaseError::InvalidSignature(SignatureError::Encoding(_)))
        ));

        let claim = SignedClaim {
            timestamp: 5,
            signature: "0x0102".to_string(),
        };
        let result = authority.recover_fresh(ClaimKind::Auth, "caller", &claim, 5, 60);
        assert!(matches!(
            result,
            Err(LeaseError::InvalidSignature(SignatureError::Malformed(_)))
        ));
    }

    #[test]
    fn node_claims_require_trusted_signer() {
        let key = signer(4);
        let mut registry = InMemoryRegistry::new(60, 1);
        let claim = sign_claim(&key, ClaimKind::Alive, "n", 100);
        let authority = SignatureAuthority::default();

        let result = authority.verify_node_claim(ClaimKind::Alive, "n", &claim, 100, &registry);
        assert!(matches!(result, Err(LeaseError::UnverifiedSigner(a)) if a == key.address()));

        registry.trust_signer(key.address());
        let signer = authority
            .verify_node_claim(ClaimKind::Alive, "n", &claim, 100, &registry)
            .unwrap();
        assert_eq!(signer, key.address());
    }
}
