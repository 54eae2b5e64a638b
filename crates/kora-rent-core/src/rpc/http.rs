//! JSON-RPC 2.0 HTTP implementation of [`ChainRpc`].
//!
//! Speaks the standard account-model RPC namespace:
//! `getSignaturesForAddress`, `getTransaction` (jsonParsed encoding),
//! `getMultipleAccounts` (base64 encoding), `getLatestBlockhash`,
//! `sendTransaction`, and `getSignatureStatuses` for the confirmation
//! poll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::{
    AccountSnapshot, BoxFuture, ChainRpc, ParsedInstruction, ParsedTransaction, RpcError,
    SignatureInfo,
};

/// How long to wait between confirmation polls.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How many confirmation polls before giving up.
const CONFIRM_POLL_ATTEMPTS: u32 = 60;

/// JSON-RPC chain client over HTTP.
pub struct HttpChainRpc {
    endpoint: String,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl HttpChainRpc {
    /// Creates a client for the given endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| RpcError::Transport(err.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
            request_id: AtomicU64::new(1),
        })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issues one JSON-RPC call and extracts the `result` field.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| RpcError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!("http status {status}")));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|err| RpcError::InvalidResponse(err.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        let result = envelope
            .get("result")
            .ok_or_else(|| RpcError::InvalidResponse("missing result field".to_string()))?;
        serde_json::from_value(result.clone())
            .map_err(|err| RpcError::InvalidResponse(err.to_string()))
    }

    fn parse_transaction_value(signature: &str, value: &Value) -> ParsedTransaction {
        let slot = value.get("slot").and_then(Value::as_u64).unwrap_or(0);
        let message = value.pointer("/transaction/message");

        // The fee payer is the first signer account key.
        let fee_payer = message
            .and_then(|m| m.get("accountKeys"))
            .and_then(Value::as_array)
            .and_then(|keys| {
                keys.iter().find(|key| {
                    key.get("signer").and_then(Value::as_bool).unwrap_or(false)
                })
            })
            .and_then(|key| key.get("pubkey"))
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let instructions = message
            .and_then(|m| m.get("instructions"))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|instr| {
                        let parsed = instr.get("parsed")?;
                        Some(ParsedInstruction {
                            program: instr
                                .get("program")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            instruction_type: parsed
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            info: parsed.get("info").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        ParsedTransaction {
            signature: signature.to_string(),
            slot,
            fee_payer,
            instructions,
        }
    }

    fn parse_account_value(value: &Value) -> Result<Option<AccountSnapshot>, RpcError> {
        if value.is_null() {
            return Ok(None);
        }
        let lamports = value
            .get("lamports")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::InvalidResponse("account without lamports".to_string()))?;
        let owner = value
            .get("owner")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidResponse("account without owner".to_string()))?
            .to_string();
        let executable = value
            .get("executable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        // Data arrives as [base64, "base64"]; the decoded length is what
        // the pipeline needs.
        let data_len = match value.get("data") {
            Some(Value::Array(parts)) => parts
                .first()
                .and_then(Value::as_str)
                .map(|encoded| {
                    use base64::engine::general_purpose::STANDARD;
                    use base64::Engine as _;
                    STANDARD
                        .decode(encoded)
                        .map(|bytes| bytes.len() as u64)
                        .map_err(|err| RpcError::InvalidResponse(err.to_string()))
                })
                .transpose()?
                .unwrap_or(0),
            _ => 0,
        };
        Ok(Some(AccountSnapshot {
            lamports,
            data_len,
            owner,
            executable,
        }))
    }
}

impl ChainRpc for HttpChainRpc {
    fn signatures_for_address<'a>(
        &'a self,
        address: &'a str,
        limit: usize,
        before: Option<&'a str>,
        until: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<SignatureInfo>, RpcError>> {
        Box::pin(async move {
            let mut options = json!({ "limit": limit });
            if let Some(before) = before {
                options["before"] = json!(before);
            }
            if let Some(until) = until {
                options["until"] = json!(until);
            }
            self.call("getSignaturesForAddress", json!([address, options]))
                .await
        })
    }

    fn transaction<'a>(
        &'a self,
        signature: &'a str,
    ) -> BoxFuture<'a, Result<Option<ParsedTransaction>, RpcError>> {
        Box::pin(async move {
            let params = json!([
                signature,
                { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }
            ]);
            let result: Value = self.call("getTransaction", params).await?;
            if result.is_null() {
                return Ok(None);
            }
            Ok(Some(Self::parse_transaction_value(signature, &result)))
        })
    }

    fn multiple_accounts<'a>(
        &'a self,
        addresses: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Option<AccountSnapshot>>, RpcError>> {
        Box::pin(async move {
            let params = json!([addresses, { "encoding": "base64" }]);
            let result: Value = self.call("getMultipleAccounts", params).await?;
            let values = result
                .get("value")
                .and_then(Value::as_array)
                .ok_or_else(|| RpcError::InvalidResponse("missing value array".to_string()))?;
            if values.len() != addresses.len() {
                return Err(RpcError::InvalidResponse(format!(
                    "requested {} accounts, got {}",
                    addresses.len(),
                    values.len()
                )));
            }
            values.iter().map(Self::parse_account_value).collect()
        })
    }

    fn latest_blockhash(&self) -> BoxFuture<'_, Result<String, RpcError>> {
        Box::pin(async move {
            let params = json!([{ "commitment": "confirmed" }]);
            let result: Value = self.call("getLatestBlockhash", params).await?;
            result
                .pointer("/value/blockhash")
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| RpcError::InvalidResponse("missing blockhash".to_string()))
        })
    }

    fn submit_and_confirm<'a>(
        &'a self,
        transaction_base64: &'a str,
    ) -> BoxFuture<'a, Result<String, RpcError>> {
        Box::pin(async move {
            let params = json!([
                transaction_base64,
                { "encoding": "base64", "preflightCommitment": "confirmed" }
            ]);
            let signature: String = self.call("sendTransaction", params).await?;

            for _ in 0..CONFIRM_POLL_ATTEMPTS {
                tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
                let result: Value = self
                    .call("getSignatureStatuses", json!([[signature]]))
                    .await?;
                let status = result.pointer("/value/0");
                match status {
                    Some(Value::Null) | None => {},
                    Some(status) => {
                        if let Some(err) = status.get("err") {
                            if !err.is_null() {
                                return Err(RpcError::Rpc {
                                    code: 0,
                                    message: format!("transaction failed: {err}"),
                                });
                            }
                        }
                        let commitment = status
                            .get("confirmationStatus")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        if commitment == "confirmed" || commitment == "finalized" {
                            return Ok(signature);
                        }
                    },
                }
            }
            Err(RpcError::Unconfirmed { signature })
        })
    }
}
