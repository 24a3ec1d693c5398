//! Per-protocol transaction retrieval with a short-lived body cache
//!
//! Consumes the two JSON-RPC methods the pipeline rides on: the per-program
//! signature listing and full transaction retrieval. `getTransaction` is
//! served in two account-encoding modes (raw index arrays or resolved
//! address lists); both are decoded here and normalized later by the parser.

use super::parser::programs;
use super::telemetry::PipelineTelemetry;
use crate::rpc::{RpcError, RpcPool};
use crate::types::{AccountRefs, Instruction, Protocol, RawTransaction, SignatureInfo};
use dashmap::DashMap;
use serde_json::{json, Value};
use smallvec::SmallVec;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct CachedTx {
    tx: RawTransaction,
    fetched_at: Instant,
}

pub struct TransactionFetcher {
    pool: Arc<RpcPool>,
    telemetry: Arc<PipelineTelemetry>,
    tx_cache: DashMap<String, CachedTx>,
    cache_ttl: Duration,
}

impl TransactionFetcher {
    pub fn new(pool: Arc<RpcPool>, telemetry: Arc<PipelineTelemetry>, cache_ttl: Duration) -> Self {
        Self {
            pool,
            telemetry,
            tx_cache: DashMap::new(),
            cache_ttl,
        }
    }

    /// Recent signatures touching the protocol's program, newest first,
    /// bounded by `limit`. Failed transactions are dropped at the source.
    pub async fn list_signatures(
        &self,
        protocol: Protocol,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError> {
        let program = programs::program_id(protocol);
        let result = self
            .pool
            .call(
                "getSignaturesForAddress",
                json!([program.to_string(), { "limit": limit }]),
            )
            .await?;

        let entries = result.as_array().ok_or_else(|| RpcError::InvalidResponse {
            message: "signature listing is not an array".to_string(),
        })?;

        let mut listings = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.get("err").map_or(true, Value::is_null) {
                continue;
            }
            let Some(signature) = entry.get("signature").and_then(Value::as_str) else {
                continue;
            };
            listings.push(SignatureInfo {
                signature: signature.to_string(),
                slot: entry.get("slot").and_then(Value::as_u64).unwrap_or(0),
                block_time: entry.get("blockTime").and_then(Value::as_i64),
                protocol,
            });
        }

        PipelineTelemetry::add(&self.telemetry.signatures_seen, listings.len() as u64);
        Ok(listings)
    }

    /// Full transaction body, served from the per-signature cache when the
    /// same signature was fetched in a recent cycle. Fetch or decode
    /// failures skip the transaction; they never abort the batch.
    pub async fn fetch_transaction(&self, info: &SignatureInfo) -> Option<RawTransaction> {
        if let Some(cached) = self.tx_cache.get(&info.signature) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                PipelineTelemetry::incr(&self.telemetry.tx_cache_hits);
                return Some(cached.tx.clone());
            }
        }

        let result = self
            .pool
            .call(
                "getTransaction",
                json!([
                    info.signature,
                    { "encoding": "json", "maxSupportedTransactionVersion": 0 }
                ]),
            )
            .await;

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                PipelineTelemetry::incr(&self.telemetry.fetch_errors);
                warn!(signature = %info.signature, error = %err, "transaction fetch failed");
                return None;
            }
        };

        match parse_transaction(&info.signature, &value) {
            Some(tx) => {
                self.tx_cache.insert(
                    info.signature.clone(),
                    CachedTx {
                        tx: tx.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(tx)
            }
            None => {
                PipelineTelemetry::incr(&self.telemetry.fetch_errors);
                debug!(signature = %info.signature, "transaction body did not decode");
                None
            }
        }
    }

    /// Drop expired cache entries
    pub fn prune_cache(&self) {
        let ttl = self.cache_ttl;
        self.tx_cache.retain(|_, cached| cached.fetched_at.elapsed() < ttl);
    }

    pub fn cache_size(&self) -> usize {
        self.tx_cache.len()
    }
}

/// Decode a `getTransaction` result into a `RawTransaction`.
///
/// Account keys arrive either as plain base58 strings or as
/// `{ "pubkey": ... }` objects; instruction account references arrive either
/// as index arrays or as resolved address strings depending on the encoding
/// mode the endpoint served.
pub(crate) fn parse_transaction(signature: &str, value: &Value) -> Option<RawTransaction> {
    if value.is_null() {
        return None;
    }

    let slot = value.get("slot").and_then(Value::as_u64).unwrap_or(0);
    let block_time = value.get("blockTime").and_then(Value::as_i64);
    let message = value.get("transaction")?.get("message")?;

    let account_keys: Vec<Pubkey> = message
        .get("accountKeys")?
        .as_array()?
        .iter()
        .filter_map(parse_account_key)
        .collect();
    if account_keys.is_empty() {
        return None;
    }

    let mut instructions = Vec::new();
    for ix in message.get("instructions")?.as_array()? {
        if let Some(instruction) = parse_instruction(ix, &account_keys) {
            instructions.push(instruction);
        }
    }

    Some(RawTransaction {
        signature: signature.to_string(),
        slot,
        block_time,
        account_keys,
        instructions,
    })
}

fn parse_account_key(value: &Value) -> Option<Pubkey> {
    let key_str = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("pubkey")?.as_str()?,
        _ => return None,
    };
    Pubkey::from_str(key_str).ok()
}

fn parse_instruction(value: &Value, account_keys: &[Pubkey]) -> Option<Instruction> {
    let program = if let Some(idx) = value.get("programIdIndex").and_then(Value::as_u64) {
        *account_keys.get(idx as usize)?
    } else {
        Pubkey::from_str(value.get("programId")?.as_str()?).ok()?
    };

    let data = value
        .get("data")
        .and_then(Value::as_str)
        .map(|s| bs58::decode(s).into_vec().unwrap_or_default())
        .unwrap_or_default();

    let accounts = parse_account_refs(value.get("accounts")?)?;

    Some(Instruction {
        program,
        data,
        accounts,
    })
}

fn parse_account_refs(value: &Value) -> Option<AccountRefs> {
    let entries = value.as_array()?;

    // Encoding detection: the resolved-address mode serves base58 strings,
    // the raw mode serves indices into the account-key list
    if entries.first().is_some_and(Value::is_string) {
        let addresses: Vec<Pubkey> = entries
            .iter()
            .filter_map(|v| v.as_str().and_then(|s| Pubkey::from_str(s).ok()))
            .collect();
        if addresses.len() != entries.len() {
            return None;
        }
        Some(AccountRefs::Addresses(addresses))
    } else {
        let mut indices: SmallVec<[u8; 16]> = SmallVec::new();
        for entry in entries {
            indices.push(entry.as_u64()? as u8);
        }
        Some(AccountRefs::Indices(indices))
    }
}
