//! Deterministic in-memory chain for pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use kora_rent_core::rpc::{
    AccountSnapshot, BoxFuture, ChainRpc, ParsedTransaction, RpcError, SignatureInfo,
};

/// A base58 32-byte address derived from a small index.
pub fn test_pubkey(index: u16) -> String {
    let mut bytes = [0u8; 32];
    bytes[0] = (index >> 8) as u8;
    bytes[1] = (index & 0xff) as u8;
    bytes[31] = 0x5a;
    bs58::encode(bytes).into_string()
}

/// An in-memory chain with controllable accounts and history.
///
/// Submitted transactions are decoded and applied: each transfer drains
/// its source account, so a re-run observes the post-transfer state the
/// way a real chain would.
#[derive(Default)]
pub struct MockChain {
    pub accounts: Mutex<HashMap<String, AccountSnapshot>>,
    /// Signature history, newest first.
    pub history: Mutex<Vec<SignatureInfo>>,
    pub transactions: Mutex<HashMap<String, ParsedTransaction>>,
    pub submitted: Mutex<Vec<String>>,
    pub fail_account_queries: AtomicBool,
    pub fail_submits: AtomicBool,
    signature_counter: AtomicU64,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, pubkey: &str, lamports: u64, data_len: u64, owner: &str) {
        self.accounts.lock().unwrap().insert(
            pubkey.to_string(),
            AccountSnapshot {
                lamports,
                data_len,
                owner: owner.to_string(),
                executable: false,
            },
        );
    }

    pub fn remove_account(&self, pubkey: &str) {
        self.accounts.lock().unwrap().remove(pubkey);
    }

    pub fn push_history(&self, entry: SignatureInfo, transaction: ParsedTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(entry.signature.clone(), transaction);
        // Newest first.
        self.history.lock().unwrap().insert(0, entry);
    }

    fn read_compact_u16(bytes: &[u8], cursor: &mut usize) -> u16 {
        let mut value: u16 = 0;
        let mut shift = 0;
        loop {
            let byte = bytes[*cursor];
            *cursor += 1;
            value |= u16::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        value
    }

    /// Decodes a submitted transaction and drains each transfer source.
    fn apply_transaction(&self, transaction_base64: &str) {
        let bytes = STANDARD.decode(transaction_base64).expect("valid base64");
        let mut cursor = 0;

        let num_signatures = Self::read_compact_u16(&bytes, &mut cursor) as usize;
        cursor += num_signatures * 64;
        cursor += 3; // message header

        let num_keys = Self::read_compact_u16(&bytes, &mut cursor) as usize;
        let mut keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let key: [u8; 32] = bytes[cursor..cursor + 32].try_into().unwrap();
            keys.push(bs58::encode(key).into_string());
            cursor += 32;
        }
        cursor += 32; // blockhash

        let num_instructions = Self::read_compact_u16(&bytes, &mut cursor) as usize;
        let mut accounts = self.accounts.lock().unwrap();
        for _ in 0..num_instructions {
            cursor += 1; // program id index
            let num_accounts = Self::read_compact_u16(&bytes, &mut cursor) as usize;
            let source_index = bytes[cursor] as usize;
            cursor += num_accounts;
            let data_len = Self::read_compact_u16(&bytes, &mut cursor) as usize;
            cursor += data_len;

            if let Some(snapshot) = accounts.get_mut(&keys[source_index]) {
                snapshot.lamports = 0;
            }
        }
    }
}

impl ChainRpc for MockChain {
    fn signatures_for_address<'a>(
        &'a self,
        _address: &'a str,
        limit: usize,
        before: Option<&'a str>,
        until: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<SignatureInfo>, RpcError>> {
        let history = self.history.lock().unwrap().clone();
        Box::pin(async move {
            let start = match before {
                Some(before) => history
                    .iter()
                    .position(|entry| entry.signature == before)
                    .map_or(history.len(), |index| index + 1),
                None => 0,
            };
            let mut page = Vec::new();
            for entry in history.iter().skip(start) {
                if Some(entry.signature.as_str()) == until {
                    break;
                }
                page.push(entry.clone());
                if page.len() == limit {
                    break;
                }
            }
            Ok(page)
        })
    }

    fn transaction<'a>(
        &'a self,
        signature: &'a str,
    ) -> BoxFuture<'a, Result<Option<ParsedTransaction>, RpcError>> {
        let transaction = self.transactions.lock().unwrap().get(signature).cloned();
        Box::pin(async move { Ok(transaction) })
    }

    fn multiple_accounts<'a>(
        &'a self,
        addresses: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Option<AccountSnapshot>>, RpcError>> {
        Box::pin(async move {
            if self.fail_account_queries.load(Ordering::SeqCst) {
                return Err(RpcError::Transport("mock outage".to_string()));
            }
            let accounts = self.accounts.lock().unwrap();
            Ok(addresses
                .iter()
                .map(|address| accounts.get(address).cloned())
                .collect())
        })
    }

    fn latest_blockhash(&self) -> BoxFuture<'_, Result<String, RpcError>> {
        Box::pin(async move { Ok(bs58::encode([7u8; 32]).into_string()) })
    }

    fn submit_and_confirm<'a>(
        &'a self,
        transaction_base64: &'a str,
    ) -> BoxFuture<'a, Result<String, RpcError>> {
        Box::pin(async move {
            if self.fail_submits.load(Ordering::SeqCst) {
                return Err(RpcError::Rpc {
                    code: -32002,
                    message: "simulation failed".to_string(),
                });
            }
            self.apply_transaction(transaction_base64);
            self.submitted
                .lock()
                .unwrap()
                .push(transaction_base64.to_string());
            let id = self.signature_counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("mock-signature-{id}"))
        })
    }
}
