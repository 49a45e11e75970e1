use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_crypto::hashing::{self, BlockHash};

use crate::blockchain::chain::Chain;
use crate::protocol::pow;

use super::errors::CodecError;
use super::split_frame;
use super::transaction::Transaction;

/// A hash-only reference to a predecessor block.
///
/// Blocks never own their ancestors; a reference resolves on demand against a
/// chain's hash index and simply fails to resolve when the ancestor has not
/// arrived yet. No hash at all means the block has no predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousRef {
    hash: Option<BlockHash>,
}

impl PreviousRef {
    pub fn none() -> Self {
        PreviousRef { hash: None }
    }

    pub fn from_hash(hash: BlockHash) -> Self {
        PreviousRef { hash: Some(hash) }
    }

    pub fn hash(&self) -> Option<BlockHash> {
        self.hash
    }

    /// Looks the referenced block up in the chain's hash index.
    pub fn resolve<'a>(&self, chain: &'a Chain) -> Option<&'a Block> {
        self.hash.and_then(|hash| chain.block_with_hash(&hash))
    }
}

/// A block is unmined while `hash` is `None` and mined once the nonce search
/// has stored an accepted digest. Mined blocks are immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub created_at: DateTime<Utc>,
    pub previous: PreviousRef,
    pub transactions: Vec<Transaction>,
    /// the nonce
    pub number: u64,
    pub hash: Option<BlockHash>,
}

/// The JSON payload. Field order here IS the canonical order; cross-node hash
/// agreement depends on it.
#[derive(Serialize, Deserialize)]
struct BlockPayload {
    created_at: DateTime<Utc>,
    /// lowercase hex, or "" when the block has no predecessor
    previous_hash: String,
    /// full canonical transaction strings, not structured forms
    transactions: Vec<String>,
    number: u64,
}

impl Block {
    pub fn new(previous: PreviousRef, transactions: Vec<Transaction>) -> Self {
        Block {
            created_at: Utc::now(),
            previous,
            transactions,
            number: 0,
            hash: None,
        }
    }

    /// The canonical payload: base64 of the payload JSON. This exact text is
    /// what gets hashed during mining and verification.
    ///
    /// The stored previous hash is serialized directly, never a resolved
    /// ancestor; a received block must re-serialize to the sender's exact
    /// bytes even when its parent is not indexed yet.
    pub fn serialize_payload(&self) -> Result<String, CodecError> {
        let mut transactions = Vec::with_capacity(self.transactions.len());
        for transaction in &self.transactions {
            transactions.push(transaction.encode()?);
        }
        let payload = BlockPayload {
            created_at: self.created_at,
            previous_hash: self
                .previous
                .hash()
                .map(|hash| hash.to_hex())
                .unwrap_or_default(),
            transactions,
            number: self.number,
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| CodecError::MalformedJson(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// SHA-256 of the canonical payload for the current nonce.
    pub fn payload_digest(&self) -> Result<BlockHash, CodecError> {
        Ok(hashing::sha256(self.serialize_payload()?.as_bytes()))
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        let hash = self.hash.ok_or(CodecError::UnminedBlock)?;
        Ok(format!("{}.{}", self.serialize_payload()?, hash.to_hex()))
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let (payload_part, tail) = split_frame(text)?;
        let payload_bytes = BASE64
            .decode(payload_part)
            .map_err(|e| CodecError::MalformedFrame(format!("payload is not base64: {e}")))?;
        let hash_bytes = hex::decode(tail)
            .map_err(|e| CodecError::MalformedFrame(format!("hash is not hex: {e}")))?;
        let hash = BlockHash::try_from(hash_bytes.as_slice())
            .map_err(|_| CodecError::BadHashLength(hash_bytes.len()))?;
        let payload: BlockPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| CodecError::MalformedJson(e.to_string()))?;

        let previous = if payload.previous_hash.is_empty() {
            PreviousRef::none()
        } else {
            let bytes = hex::decode(&payload.previous_hash).map_err(|e| {
                CodecError::MalformedJson(format!("previous_hash is not hex: {e}"))
            })?;
            let previous_hash = BlockHash::try_from(bytes.as_slice())
                .map_err(|_| CodecError::BadHashLength(bytes.len()))?;
            PreviousRef::from_hash(previous_hash)
        };

        let mut transactions = Vec::with_capacity(payload.transactions.len());
        for raw in &payload.transactions {
            transactions.push(Transaction::decode(raw)?);
        }

        Ok(Block {
            created_at: payload.created_at,
            previous,
            transactions,
            number: payload.number,
            hash: Some(hash),
        })
    }

    /// True when every contained transaction verifies.
    pub fn verify_transactions(&self) -> Result<bool, CodecError> {
        for transaction in &self.transactions {
            if !transaction.verify()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The mined-block invariant: the payload digest equals the stored hash,
    /// the digest passes the proof-of-work test, and every transaction
    /// verifies. Unmined blocks never verify.
    pub fn verify(&self) -> Result<bool, CodecError> {
        let stored = match self.hash {
            Some(hash) => hash,
            None => return Ok(false),
        };
        let digest = self.payload_digest()?;
        if digest != stored || !pow::accepts(&digest) {
            return Ok(false);
        }
        self.verify_transactions()
    }
}
