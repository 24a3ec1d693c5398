//! Per-protocol instruction decoding with heuristic fallback
//!
//! Dispatch is a tagged table: program id → protocol → discriminator →
//! operation layout. Unknown programs are recorded and skipped; unknown
//! discriminators inside a recognized program go through a structural
//! heuristic instead of being silently dropped. Account references are
//! normalized to indices before any layout-based extraction.

use crate::types::{
    AccountRefs, Instruction, PoolCandidate, Protocol, Provenance, RawTransaction,
};
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::trace;

/// Program identifiers for the supported DEX protocols
pub mod programs {
    use super::*;

    pub static RAYDIUM_AMM_V4: Lazy<Pubkey> =
        Lazy::new(|| Pubkey::from_str("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8").unwrap());

    pub static PUMP_FUN: Lazy<Pubkey> =
        Lazy::new(|| Pubkey::from_str("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P").unwrap());

    pub static ORCA_WHIRLPOOL: Lazy<Pubkey> =
        Lazy::new(|| Pubkey::from_str("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc").unwrap());

    /// Wrapped SOL, the implicit quote side of bonding-curve launches
    pub static WSOL: Lazy<Pubkey> =
        Lazy::new(|| Pubkey::from_str("So11111111111111111111111111111111111111112").unwrap());

    pub fn program_id(protocol: Protocol) -> &'static Pubkey {
        match protocol {
            Protocol::Raydium => &RAYDIUM_AMM_V4,
            Protocol::PumpFun => &PUMP_FUN,
            Protocol::Orca => &ORCA_WHIRLPOOL,
            Protocol::Unknown => &RAYDIUM_AMM_V4,
        }
    }

    pub fn protocol_for(program: &Pubkey) -> Protocol {
        if program == &*RAYDIUM_AMM_V4 {
            Protocol::Raydium
        } else if program == &*PUMP_FUN {
            Protocol::PumpFun
        } else if program == &*ORCA_WHIRLPOOL {
            Protocol::Orca
        } else {
            Protocol::Unknown
        }
    }
}

/// One pool-creation operation: discriminator prefix plus the account-role
/// layout the extraction reads at fixed offsets
#[derive(Debug, Clone, Copy)]
struct PoolOp {
    name: &'static str,
    discriminator: &'static [u8],
    min_accounts: usize,
    primary_mint: usize,
    /// None: the quote side is implicit (wrapped SOL)
    secondary_mint: Option<usize>,
    pool_address: usize,
    confidence: f64,
}

/// Raydium AMM v4 uses a single-byte instruction tag
static RAYDIUM_OPS: &[PoolOp] = &[
    PoolOp {
        name: "initialize",
        discriminator: &[0],
        min_accounts: 14,
        primary_mint: 8,
        secondary_mint: Some(9),
        pool_address: 4,
        confidence: 0.95,
    },
    PoolOp {
        name: "initialize2",
        discriminator: &[1],
        min_accounts: 17,
        primary_mint: 8,
        secondary_mint: Some(9),
        pool_address: 4,
        confidence: 0.90,
    },
];

/// Pump.fun and Orca are Anchor programs: 8-byte method discriminators
static PUMPFUN_OPS: &[PoolOp] = &[PoolOp {
    name: "create",
    discriminator: &[24, 30, 200, 40, 5, 28, 7, 119],
    min_accounts: 8,
    primary_mint: 0,
    secondary_mint: None,
    pool_address: 2,
    confidence: 0.95,
}];

static ORCA_OPS: &[PoolOp] = &[
    PoolOp {
        name: "initializePool",
        discriminator: &[95, 180, 10, 172, 84, 174, 232, 40],
        min_accounts: 11,
        primary_mint: 1,
        secondary_mint: Some(2),
        pool_address: 4,
        confidence: 0.95,
    },
    PoolOp {
        name: "initializePoolV2",
        discriminator: &[207, 45, 87, 242, 27, 63, 204, 67],
        min_accounts: 13,
        primary_mint: 1,
        secondary_mint: Some(2),
        pool_address: 6,
        confidence: 0.90,
    },
];

/// Minimum accounts before the structural heuristic will consider an
/// unknown discriminator
const HEURISTIC_MIN_ACCOUNTS: usize = 8;

/// Parser confidence assigned to heuristic detections
const HEURISTIC_CONFIDENCE: f64 = 0.55;

fn ops_for(protocol: Protocol) -> &'static [PoolOp] {
    match protocol {
        Protocol::Raydium => RAYDIUM_OPS,
        Protocol::PumpFun => PUMPFUN_OPS,
        Protocol::Orca => ORCA_OPS,
        Protocol::Unknown => &[],
    }
}

/// Why a recognized-program instruction produced no candidate.
/// These are normal outcomes of the decode path, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCandidateReason {
    /// Instruction payload is empty
    EmptyData,
    /// Account reference could not be mapped back to the key list
    UnresolvedAccount,
    /// Fewer accounts than the operation's layout requires
    InsufficientAccounts { needed: usize, got: usize },
    /// Structural heuristic rejected the account roles
    StructuralMismatch,
}

/// Outcome of inspecting one instruction
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Candidate(PoolCandidate),
    NoCandidate(NoCandidateReason),
    /// Program not in the dispatch table
    Unrecognized,
}

/// Account-reference normalization failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("account address not present in the transaction key list")]
    UnknownAddress,
    #[error("account index out of range for the transaction key list")]
    IndexOutOfRange,
}

/// Map account references back to indices into the transaction's key list.
///
/// The resolved-address fetch mode loses the index structure; extracting at
/// fixed offsets without this mapping reads the wrong accounts and silently
/// corrupts every candidate, so an address that cannot be mapped aborts the
/// instruction.
pub fn normalize_account_refs(
    account_keys: &[Pubkey],
    refs: &AccountRefs,
) -> Result<SmallVec<[u8; 16]>, NormalizeError> {
    match refs {
        AccountRefs::Indices(indices) => {
            for &idx in indices.iter() {
                if idx as usize >= account_keys.len() {
                    return Err(NormalizeError::IndexOutOfRange);
                }
            }
            Ok(indices.clone())
        }
        AccountRefs::Addresses(addresses) => {
            let mut indices = SmallVec::with_capacity(addresses.len());
            for address in addresses {
                let idx = account_keys
                    .iter()
                    .position(|key| key == address)
                    .ok_or(NormalizeError::UnknownAddress)?;
                indices.push(idx as u8);
            }
            Ok(indices)
        }
    }
}

/// Resolve indices back to addresses; inverse of normalization over a fixed
/// key list
pub fn resolve_account_refs(account_keys: &[Pubkey], indices: &[u8]) -> Option<Vec<Pubkey>> {
    indices
        .iter()
        .map(|&idx| account_keys.get(idx as usize).copied())
        .collect()
}

/// Startup self-check: resolving indices to addresses and normalizing them
/// back must reproduce the original indices over a synthetic key list.
pub fn normalization_self_check() -> bool {
    let keys: Vec<Pubkey> = (0..12).map(|_| Pubkey::new_unique()).collect();
    let original: SmallVec<[u8; 16]> = SmallVec::from_slice(&[3, 0, 7, 11, 5]);

    let Some(addresses) = resolve_account_refs(&keys, &original) else {
        return false;
    };
    match normalize_account_refs(&keys, &AccountRefs::Addresses(addresses)) {
        Ok(round_tripped) => round_tripped == original,
        Err(_) => false,
    }
}

#[derive(Debug)]
pub struct InstructionParser;

impl InstructionParser {
    pub fn new() -> Self {
        // Guard against the silent-corruption failure mode before any
        // transaction is decoded
        assert!(
            normalization_self_check(),
            "account-index normalization self-check failed"
        );
        Self
    }

    /// Inspect one instruction of a transaction
    pub fn parse(&self, tx: &RawTransaction, ix: &Instruction) -> ParseOutcome {
        let protocol = programs::protocol_for(&ix.program);
        if protocol == Protocol::Unknown {
            return ParseOutcome::Unrecognized;
        }

        if ix.data.is_empty() {
            return ParseOutcome::NoCandidate(NoCandidateReason::EmptyData);
        }

        let indices = match normalize_account_refs(&tx.account_keys, &ix.accounts) {
            Ok(indices) => indices,
            Err(err) => {
                trace!(signature = %tx.signature, error = %err, "account normalization failed");
                return ParseOutcome::NoCandidate(NoCandidateReason::UnresolvedAccount);
            }
        };

        match decode_op(protocol, &ix.data) {
            Some(op) => self.extract(protocol, tx, &indices, op),
            None => self.heuristic(protocol, tx, &indices),
        }
    }

    /// Layout-based extraction at the operation's fixed account-role offsets
    fn extract(
        &self,
        protocol: Protocol,
        tx: &RawTransaction,
        indices: &[u8],
        op: &PoolOp,
    ) -> ParseOutcome {
        if indices.len() < op.min_accounts {
            trace!(
                op = op.name,
                needed = op.min_accounts,
                got = indices.len(),
                "structurally insufficient accounts"
            );
            return ParseOutcome::NoCandidate(NoCandidateReason::InsufficientAccounts {
                needed: op.min_accounts,
                got: indices.len(),
            });
        }

        let account = |role: usize| tx.account_keys[indices[role] as usize];

        let primary_mint = account(op.primary_mint);
        let secondary_mint = op
            .secondary_mint
            .map(account)
            .unwrap_or(*programs::WSOL);
        let pool_address = account(op.pool_address);

        if primary_mint == secondary_mint || primary_mint == pool_address {
            return ParseOutcome::NoCandidate(NoCandidateReason::StructuralMismatch);
        }

        ParseOutcome::Candidate(PoolCandidate {
            protocol,
            primary_mint,
            secondary_mint,
            pool_address,
            confidence: op.confidence,
            provenance: Provenance::Discriminator,
            signature: tx.signature.clone(),
            slot: tx.slot,
            discovered_at: 0,
        })
    }

    /// Structural heuristic for unknown discriminators within a recognized
    /// program: enough accounts for a pool layout, a non-trivial payload,
    /// and distinct mint/pool roles that are not the program itself. A pass
    /// yields a low-confidence candidate rather than a silent drop.
    fn heuristic(&self, protocol: Protocol, tx: &RawTransaction, indices: &[u8]) -> ParseOutcome {
        if indices.len() < HEURISTIC_MIN_ACCOUNTS {
            return ParseOutcome::NoCandidate(NoCandidateReason::InsufficientAccounts {
                needed: HEURISTIC_MIN_ACCOUNTS,
                got: indices.len(),
            });
        }

        let program = programs::program_id(protocol);
        let resolved: Vec<Pubkey> = indices
            .iter()
            .map(|&idx| tx.account_keys[idx as usize])
            .collect();

        let primary_mint = resolved[0];
        let pool_address = match resolved
            .iter()
            .skip(1)
            .find(|key| **key != primary_mint && *key != program && **key != Pubkey::default())
        {
            Some(key) => *key,
            None => return ParseOutcome::NoCandidate(NoCandidateReason::StructuralMismatch),
        };

        if primary_mint == *program || primary_mint == Pubkey::default() {
            return ParseOutcome::NoCandidate(NoCandidateReason::StructuralMismatch);
        }

        ParseOutcome::Candidate(PoolCandidate {
            protocol,
            primary_mint,
            secondary_mint: *programs::WSOL,
            pool_address,
            confidence: HEURISTIC_CONFIDENCE,
            provenance: Provenance::Heuristic,
            signature: tx.signature.clone(),
            slot: tx.slot,
            discovered_at: 0,
        })
    }
}

impl Default for InstructionParser {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_op(protocol: Protocol, data: &[u8]) -> Option<&'static PoolOp> {
    ops_for(protocol)
        .iter()
        .find(|op| data.len() >= op.discriminator.len() && data.starts_with(op.discriminator))
}
