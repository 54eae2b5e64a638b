//! Attestation verification.
//!
//! A verifier holds only the document, with no ledger and no chain
//! access:
//!
//! 1. re-canonicalize the manifest and result digest and recompute the
//!    composite hash; compare to `attestation_hash`;
//! 2. check that the manifest embeds the same `db_state_hash` as the
//!    document;
//! 3. when both `signature` and `manifest.operator_pubkey` are present,
//!    verify the detached Ed25519 signature of the raw hash bytes. A
//!    document with a signature but a null operator pubkey is accepted on
//!    hash alone; the signature check is skipped.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use serde_json::Value;
use thiserror::Error;

use super::{compute_attestation_hash, AttestationDocument, AttestationError};
use crate::keypair::decode_pubkey;
use crate::state_hash::hex_decode;

/// Verification failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// The recomputed hash did not match the document's.
    #[error("attestation hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch {
        /// The hash claimed by the document.
        expected: String,
        /// The hash recomputed from the document's contents.
        actual: String,
    },

    /// The manifest embeds a different database state hash than the
    /// document carries.
    #[error("manifest db_state_hash does not match document db_state_hash")]
    DbHashMismatch,

    /// The operator pubkey was present but not a valid Ed25519 key.
    #[error("operator_pubkey is not a valid Ed25519 public key")]
    InvalidOperatorKey,

    /// The signature was present but not valid base64 of 64 bytes.
    #[error("signature is not valid base64 of 64 bytes")]
    InvalidSignatureEncoding,

    /// The signature did not verify under the operator pubkey.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The document could not be re-canonicalized.
    #[error(transparent)]
    Document(#[from] AttestationError),
}

/// Verifies an attestation document.
///
/// # Errors
///
/// Returns the first failed check; a document passing all checks yields
/// `Ok(())`.
pub fn verify(document: &AttestationDocument) -> Result<(), VerifyError> {
    // Step 1: the composite hash must recompute from the document alone.
    let actual = compute_attestation_hash(
        &document.manifest,
        &document.db_state_hash,
        &document.result_digest,
    )?;
    if actual != document.attestation_hash {
        return Err(VerifyError::HashMismatch {
            expected: document.attestation_hash.clone(),
            actual,
        });
    }

    // Step 2: the manifest must bind the same database state.
    let embedded = document
        .manifest
        .get("db_state_hash")
        .and_then(Value::as_str);
    if embedded != Some(document.db_state_hash.as_str()) {
        return Err(VerifyError::DbHashMismatch);
    }

    // Step 3: signature, when attributable to an operator key.
    let operator_pubkey = document
        .manifest
        .get("operator_pubkey")
        .and_then(Value::as_str);
    if let (Some(signature), Some(pubkey)) = (&document.signature, operator_pubkey) {
        let key_bytes = decode_pubkey(pubkey).ok_or(VerifyError::InvalidOperatorKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::InvalidOperatorKey)?;

        let signature_bytes = STANDARD
            .decode(signature)
            .map_err(|_| VerifyError::InvalidSignatureEncoding)?;
        let signature_array: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidSignatureEncoding)?;
        let signature = Signature::from_bytes(&signature_array);

        let hash_bytes = hex_decode(&document.attestation_hash).ok_or_else(|| {
            VerifyError::Document(AttestationError::MalformedDocument(
                "attestation_hash is not valid hex".to_string(),
            ))
        })?;
        verifying_key
            .verify(&hash_bytes, &signature)
            .map_err(|_| VerifyError::SignatureInvalid)?;
    }

    Ok(())
}
