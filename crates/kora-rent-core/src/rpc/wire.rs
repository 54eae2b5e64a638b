//! Legacy transaction wire encoding for reclamation batches.
//!
//! A reclamation transaction carries one system-program transfer per
//! verified account, moving that account's `verified_lamports` back to
//! the operator. The operator is the fee payer and sole signer; the
//! message is bound to a recent blockhash so a lost confirmation cannot
//! be replayed.
//!
//! Wire layout (legacy message format):
//!
//! ```text
//! transaction  = compact_u16(num_signatures) || signatures || message
//! message      = header(3 bytes)
//!             || compact_u16(num_keys) || account_keys (32 bytes each)
//!             || recent_blockhash (32 bytes)
//!             || compact_u16(num_instructions) || instructions
//! instruction  = program_id_index (u8)
//!             || compact_u16(num_accounts) || account_indices
//!             || compact_u16(data_len) || data
//! transfer data = u32 LE discriminant (2) || u64 LE lamports
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::keypair::{decode_pubkey, OperatorKeypair};
use crate::rpc::SYSTEM_PROGRAM_ID;

/// System-program instruction discriminant for `Transfer`.
const TRANSFER_DISCRIMINANT: u32 = 2;

/// Errors that can occur while encoding a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WireError {
    /// A source address was not valid base58 of 32 bytes.
    #[error("invalid account address: {address}")]
    InvalidAddress {
        /// The offending address.
        address: String,
    },

    /// The blockhash was not valid base58 of 32 bytes.
    #[error("invalid blockhash: {blockhash}")]
    InvalidBlockhash {
        /// The offending blockhash.
        blockhash: String,
    },

    /// The batch was empty.
    #[error("cannot encode an empty transfer batch")]
    EmptyBatch,
}

/// One planned transfer: drain `lamports` from `source` to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    /// Source account, base58.
    pub source: String,
    /// The verified on-chain balance to move.
    pub lamports: u64,
}

/// Appends a compact-u16 (shortvec) length prefix.
pub(crate) fn encode_compact_u16(mut value: u16, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Builds, signs, and base64-encodes one reclamation transaction.
///
/// Account-key table: operator first (signer, writable, fee payer), then
/// each distinct source account (writable), then the system program
/// (readonly). The operator's single signature covers the serialized
/// message.
///
/// # Errors
///
/// Returns an error for an empty batch or malformed addresses.
pub fn build_transfer_transaction(
    operator: &OperatorKeypair,
    transfers: &[PlannedTransfer],
    recent_blockhash: &str,
) -> Result<String, WireError> {
    if transfers.is_empty() {
        return Err(WireError::EmptyBatch);
    }

    let blockhash =
        decode_pubkey(recent_blockhash).ok_or_else(|| WireError::InvalidBlockhash {
            blockhash: recent_blockhash.to_string(),
        })?;

    let operator_key = operator.verifying_key().to_bytes();
    let system_key = decode_pubkey(SYSTEM_PROGRAM_ID).ok_or_else(|| WireError::InvalidAddress {
        address: SYSTEM_PROGRAM_ID.to_string(),
    })?;

    // Key table: operator, sources in batch order (deduplicated), system
    // program last.
    let mut keys: Vec<[u8; 32]> = vec![operator_key];
    let mut source_indices = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let key = decode_pubkey(&transfer.source).ok_or_else(|| WireError::InvalidAddress {
            address: transfer.source.clone(),
        })?;
        let existing = keys.iter().position(|existing| *existing == key);
        let index = if let Some(index) = existing {
            index
        } else {
            keys.push(key);
            keys.len() - 1
        };
        source_indices.push(index as u8);
    }
    keys.push(system_key);
    let program_index = (keys.len() - 1) as u8;

    let mut message = Vec::with_capacity(3 + 1 + keys.len() * 32 + 32 + transfers.len() * 16);
    // Header: one required signature (the operator), no readonly signed
    // keys, one readonly unsigned key (the system program).
    message.push(1);
    message.push(0);
    message.push(1);

    encode_compact_u16(keys.len() as u16, &mut message);
    for key in &keys {
        message.extend_from_slice(key);
    }
    message.extend_from_slice(&blockhash);

    encode_compact_u16(transfers.len() as u16, &mut message);
    for (transfer, source_index) in transfers.iter().zip(&source_indices) {
        message.push(program_index);
        encode_compact_u16(2, &mut message);
        message.push(*source_index);
        message.push(0); // destination: the operator
        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&TRANSFER_DISCRIMINANT.to_le_bytes());
        data.extend_from_slice(&transfer.lamports.to_le_bytes());
        encode_compact_u16(data.len() as u16, &mut message);
        message.extend_from_slice(&data);
    }

    let signature = operator.sign(&message);

    let mut transaction = Vec::with_capacity(1 + 64 + message.len());
    encode_compact_u16(1, &mut transaction);
    transaction.extend_from_slice(&signature);
    transaction.extend_from_slice(&message);

    Ok(STANDARD.encode(transaction))
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::*;

    fn operator() -> OperatorKeypair {
        OperatorKeypair::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    fn source(n: u8) -> String {
        bs58::encode([n; 32]).into_string()
    }

    fn blockhash() -> String {
        bs58::encode([9u8; 32]).into_string()
    }

    #[test]
    fn compact_u16_encoding() {
        let cases: [(u16, &[u8]); 5] = [
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16383, &[0xff, 0x7f]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            encode_compact_u16(value, &mut out);
            assert_eq!(out, expected, "value {value}");
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = build_transfer_transaction(&operator(), &[], &blockhash()).unwrap_err();
        assert_eq!(err, WireError::EmptyBatch);
    }

    #[test]
    fn bad_address_is_rejected() {
        let transfers = [PlannedTransfer {
            source: "not-base58-0OIl".to_string(),
            lamports: 1,
        }];
        let err = build_transfer_transaction(&operator(), &transfers, &blockhash()).unwrap_err();
        assert!(matches!(err, WireError::InvalidAddress { .. }));
    }

    #[test]
    fn transaction_layout_is_well_formed() {
        let op = operator();
        let transfers = [
            PlannedTransfer {
                source: source(1),
                lamports: 2_000_000,
            },
            PlannedTransfer {
                source: source(2),
                lamports: 500,
            },
        ];
        let encoded = build_transfer_transaction(&op, &transfers, &blockhash()).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();

        // One signature.
        assert_eq!(bytes[0], 1);
        let message = &bytes[1 + 64..];
        // Header.
        assert_eq!(&message[..3], &[1, 0, 1]);
        // Key table: operator + 2 sources + system program.
        assert_eq!(message[3], 4);
        let keys_end = 4 + 4 * 32;
        assert_eq!(&message[4..36], &op.verifying_key().to_bytes());
        // Blockhash follows the key table.
        assert_eq!(&message[keys_end..keys_end + 32], &[9u8; 32]);
        // Two instructions.
        assert_eq!(message[keys_end + 32], 2);

        // The signature verifies over the message bytes.
        use ed25519_dalek::{Signature, Verifier as _};
        let signature = Signature::from_bytes(bytes[1..65].try_into().unwrap());
        assert!(op.verifying_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn duplicate_sources_share_a_key_table_entry() {
        let transfers = [
            PlannedTransfer {
                source: source(1),
                lamports: 10,
            },
            PlannedTransfer {
                source: source(1),
                lamports: 20,
            },
        ];
        let encoded =
            build_transfer_transaction(&operator(), &transfers, &blockhash()).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let message = &bytes[1 + 64..];
        // operator + one source + system program
        assert_eq!(message[3], 3);
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let op = OperatorKeypair::from_signing_key(key);
        let transfers = [PlannedTransfer {
            source: source(3),
            lamports: 123,
        }];
        let first = build_transfer_transaction(&op, &transfers, &blockhash()).unwrap();
        let second = build_transfer_transaction(&op, &transfers, &blockhash()).unwrap();
        assert_eq!(first, second);
    }
}
