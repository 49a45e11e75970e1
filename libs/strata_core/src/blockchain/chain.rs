use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_crypto::hashing::BlockHash;
use tracing::instrument;

use crate::primitives::block::Block;
use crate::primitives::errors::CodecError;

/// One candidate branch of the chain.
///
/// An appendage does not own blocks; it records its two endpoints by hash,
/// its length in blocks, and when it last grew. Both endpoints are always
/// present in the owning chain's hash index.
#[derive(Debug, Clone, PartialEq)]
pub struct Appendage {
    pub genesis: BlockHash,
    pub head: BlockHash,
    pub length: u64,
    pub updated_at: DateTime<Utc>,
}

/// Wire form of an appendage: endpoints as canonical block strings.
#[derive(Serialize, Deserialize)]
pub struct AppendageView {
    pub genesis: String,
    pub head: String,
    pub chain_length: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
pub struct ChainView {
    pub appendages: Vec<AppendageView>,
}

/// All blocks this node knows about, keyed by hash, plus the candidate
/// branches built over them. Consensus is simply preferring the longest
/// branch; everything here is local bookkeeping toward that choice.
#[derive(Debug, Default)]
pub struct Chain {
    index: HashMap<BlockHash, Block>,
    appendages: Vec<Appendage>,
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            index: HashMap::new(),
            appendages: Vec::new(),
        }
    }

    /// Records a mined block in the hash index. Returns false for unmined
    /// blocks and for hashes that are already indexed; neither alters the
    /// appendage set.
    pub fn insert_block(&mut self, block: Block) -> bool {
        let hash = match block.hash {
            Some(hash) => hash,
            None => return false,
        };
        if self.index.contains_key(&hash) {
            return false;
        }
        self.index.insert(hash, block);
        true
    }

    /// Inserts a block and fits it into the appendage set.
    ///
    /// Placement tries, in order: extend the appendage whose head is the
    /// block's predecessor; fork off the first appendage holding the
    /// predecessor somewhere in its ancestry; otherwise open a fresh
    /// appendage with the block as both endpoints.
    #[instrument(skip_all, fields(block = ?block.hash))]
    pub fn insert_and_place(&mut self, block: Block) -> bool {
        let hash = match block.hash {
            Some(hash) => hash,
            None => return false,
        };
        let previous = block.previous;
        if !self.insert_block(block) {
            return false;
        }
        let now = Utc::now();

        // placement only considers predecessors we actually hold
        if let Some(previous_hash) = previous.hash().filter(|h| self.index.contains_key(h)) {
            if let Some(appendage) = self
                .appendages
                .iter_mut()
                .find(|a| a.head == previous_hash)
            {
                tracing::debug!(appendage = %appendage.head, "extending existing appendage");
                appendage.head = hash;
                appendage.length += 1;
                appendage.updated_at = now;
                return true;
            }

            tracing::debug!("no appendage head matches, searching ancestries for a fork point");
            let mut forked = None;
            for appendage in &self.appendages {
                if let Some(depth) = self.depth_behind_head(appendage, &previous_hash) {
                    if depth < appendage.length {
                        forked = Some(Appendage {
                            genesis: appendage.genesis,
                            head: hash,
                            length: appendage.length - depth,
                            updated_at: now,
                        });
                        break;
                    }
                }
            }
            if let Some(appendage) = forked {
                tracing::debug!(genesis = %appendage.genesis, length = appendage.length, "forking a new appendage");
                self.appendages.push(appendage);
                return true;
            }
        }

        tracing::debug!("block fits nowhere, opening a new appendage");
        self.appendages.push(Appendage {
            genesis: hash,
            head: hash,
            length: 1,
            updated_at: now,
        });
        true
    }

    /// Walks backward from an appendage head's predecessor hunting for
    /// `target`. Returns how many steps past the head's predecessor the match
    /// sits, or None when the ancestry runs out first.
    fn depth_behind_head(&self, appendage: &Appendage, target: &BlockHash) -> Option<u64> {
        let head = self.index.get(&appendage.head)?;
        let mut current = head.previous.resolve(self)?;
        let mut depth = 0;
        loop {
            if current.hash == Some(*target) {
                return Some(depth);
            }
            current = current.previous.resolve(self)?;
            depth += 1;
        }
    }

    pub fn block_with_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.index.get(hash)
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn appendages(&self) -> &[Appendage] {
        &self.appendages
    }

    /// Used by sync to record a branch whose blocks were just fetched.
    pub fn push_appendage(&mut self, appendage: Appendage) {
        self.appendages.push(appendage);
    }

    fn longest_appendage_length(&self) -> u64 {
        self.appendages.iter().map(|a| a.length).max().unwrap_or(0)
    }

    /// All appendages tied for the greatest length.
    pub fn longest_appendages(&self) -> Vec<&Appendage> {
        let length = self.longest_appendage_length();
        self.appendages
            .iter()
            .filter(|a| a.length == length)
            .collect()
    }

    /// The branch the miner builds on: greatest length, ties broken by the
    /// most recent `updated_at`, remaining ties by first occurrence.
    pub fn primary_appendage(&self) -> Option<&Appendage> {
        let longest = self.longest_appendages();
        if longest.len() <= 1 {
            return longest.into_iter().next();
        }
        let newest = longest.iter().map(|a| a.updated_at).max()?;
        longest.into_iter().find(|a| a.updated_at == newest)
    }

    /// Drops appendages of length <= `minimum_length`, preserving the order
    /// of survivors. The hash index is left untouched.
    pub fn cull_appendages_shorter_than(&mut self, minimum_length: u64) {
        self.appendages.retain(|a| a.length > minimum_length);
    }

    pub fn to_wire(&self) -> Result<ChainView, CodecError> {
        let mut appendages = Vec::with_capacity(self.appendages.len());
        for appendage in &self.appendages {
            let genesis = self
                .index
                .get(&appendage.genesis)
                .ok_or_else(|| CodecError::UnresolvedReference(appendage.genesis.to_hex()))?;
            let head = self
                .index
                .get(&appendage.head)
                .ok_or_else(|| CodecError::UnresolvedReference(appendage.head.to_hex()))?;
            appendages.push(AppendageView {
                genesis: genesis.encode()?,
                head: head.encode()?,
                chain_length: appendage.length,
                updated_at: appendage.updated_at,
            });
        }
        Ok(ChainView { appendages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::block::PreviousRef;
    use crate::protocol::pow::mine;
    use strata_crypto::hashing::sha256;

    fn mined_block(previous: PreviousRef) -> Block {
        let mut block = Block::new(previous, vec![]);
        assert!(mine(&mut block, None).unwrap());
        block
    }

    /// Mines `length` chained blocks into the chain and returns their hashes.
    fn grow_branch(chain: &mut Chain, from: Option<BlockHash>, length: usize) -> Vec<BlockHash> {
        let mut hashes = Vec::new();
        let mut previous = match from {
            Some(hash) => PreviousRef::from_hash(hash),
            None => PreviousRef::none(),
        };
        for _ in 0..length {
            let block = mined_block(previous);
            let hash = block.hash.unwrap();
            assert!(chain.insert_and_place(block));
            previous = PreviousRef::from_hash(hash);
            hashes.push(hash);
        }
        hashes
    }

    #[test]
    fn test_insert_rejects_unmined_block() {
        let mut chain = Chain::new();
        let block = Block::new(PreviousRef::none(), vec![]);
        assert!(!chain.insert_block(block.clone()));
        assert!(!chain.insert_and_place(block));
        assert_eq!(chain.block_count(), 0);
        assert!(chain.appendages().is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicate_hash() {
        let mut chain = Chain::new();
        let block = mined_block(PreviousRef::none());
        assert!(chain.insert_and_place(block.clone()));
        assert!(!chain.insert_and_place(block));
        assert_eq!(chain.block_count(), 1);
        assert_eq!(chain.appendages().len(), 1);
    }

    #[test]
    fn test_genesis_opens_appendage_of_one() {
        let mut chain = Chain::new();
        let hashes = grow_branch(&mut chain, None, 1);
        let appendage = &chain.appendages()[0];
        assert_eq!(appendage.genesis, hashes[0]);
        assert_eq!(appendage.head, hashes[0]);
        assert_eq!(appendage.length, 1);
    }

    #[test]
    fn test_extension_advances_the_head() {
        let mut chain = Chain::new();
        let hashes = grow_branch(&mut chain, None, 3);
        assert_eq!(chain.appendages().len(), 1);
        let appendage = &chain.appendages()[0];
        assert_eq!(appendage.genesis, hashes[0]);
        assert_eq!(appendage.head, hashes[2]);
        assert_eq!(appendage.length, 3);
    }

    #[test]
    fn test_fork_from_ancestor_creates_new_appendage() {
        let mut chain = Chain::new();
        let hashes = grow_branch(&mut chain, None, 4);

        // fork off the second block of the branch
        let fork = mined_block(PreviousRef::from_hash(hashes[1]));
        let fork_hash = fork.hash.unwrap();
        assert!(chain.insert_and_place(fork));

        assert_eq!(chain.appendages().len(), 2);
        let forked = &chain.appendages()[1];
        assert_eq!(forked.genesis, hashes[0]);
        assert_eq!(forked.head, fork_hash);
        // genesis, hashes[1], fork
        assert_eq!(forked.length, 3);
    }

    #[test]
    fn test_unknown_predecessor_opens_new_appendage() {
        let mut chain = Chain::new();
        grow_branch(&mut chain, None, 2);

        let orphan = mined_block(PreviousRef::from_hash(sha256(b"nowhere")));
        let orphan_hash = orphan.hash.unwrap();
        assert!(chain.insert_and_place(orphan));

        assert_eq!(chain.appendages().len(), 2);
        let appendage = &chain.appendages()[1];
        assert_eq!(appendage.genesis, orphan_hash);
        assert_eq!(appendage.length, 1);
    }

    #[test]
    fn test_primary_prefers_length_then_recency() {
        let mut chain = Chain::new();
        let now = Utc::now();
        chain.push_appendage(Appendage {
            genesis: sha256(b"a"),
            head: sha256(b"a-head"),
            length: 3,
            updated_at: now,
        });
        chain.push_appendage(Appendage {
            genesis: sha256(b"b"),
            head: sha256(b"b-head"),
            length: 4,
            updated_at: now - chrono::Duration::seconds(60),
        });
        assert_eq!(chain.primary_appendage().unwrap().head, sha256(b"b-head"));

        // equal lengths fall back to the newest
        chain.push_appendage(Appendage {
            genesis: sha256(b"c"),
            head: sha256(b"c-head"),
            length: 4,
            updated_at: now,
        });
        assert_eq!(chain.primary_appendage().unwrap().head, sha256(b"c-head"));

        // a full tie picks the first occurrence
        chain.push_appendage(Appendage {
            genesis: sha256(b"d"),
            head: sha256(b"d-head"),
            length: 4,
            updated_at: now,
        });
        assert_eq!(chain.primary_appendage().unwrap().head, sha256(b"c-head"));
    }

    #[test]
    fn test_fork_resolution_switches_primary() {
        let mut chain = Chain::new();
        let trunk = grow_branch(&mut chain, None, 3);
        grow_branch(&mut chain, Some(trunk[0]), 3); // lengths now 3 and 4
        assert_eq!(chain.primary_appendage().unwrap().length, 4);

        // extend the shorter branch past the longer one
        let short_head = chain.appendages()[0].head;
        grow_branch(&mut chain, Some(short_head), 2);
        let primary = chain.primary_appendage().unwrap();
        assert_eq!(primary.length, 5);
        assert_eq!(primary.genesis, trunk[0]);
    }

    #[test]
    fn test_cull_preserves_survivor_order() {
        let mut chain = Chain::new();
        let trunk = grow_branch(&mut chain, None, 4);
        grow_branch(&mut chain, Some(trunk[1]), 1); // fork of length 3
        let fork = mined_block(PreviousRef::from_hash(trunk[0]));
        chain.insert_and_place(fork); // fork of length 2
        assert_eq!(chain.appendages().len(), 3);

        chain.cull_appendages_shorter_than(2);
        let lengths: Vec<u64> = chain.appendages().iter().map(|a| a.length).collect();
        assert_eq!(lengths, vec![4, 3]);
        // the index is not pruned
        assert_eq!(chain.block_count(), 6);
    }

    #[test]
    fn test_appendage_walk_reaches_genesis() {
        let mut chain = Chain::new();
        let hashes = grow_branch(&mut chain, None, 5);
        let appendage = &chain.appendages()[0];

        let mut current = chain.block_with_hash(&appendage.head).unwrap();
        let mut steps = 0;
        while current.hash != Some(appendage.genesis) {
            current = current.previous.resolve(&chain).unwrap();
            steps += 1;
        }
        assert_eq!(steps, appendage.length - 1);
        assert_eq!(appendage.genesis, hashes[0]);
    }

    #[test]
    fn test_wire_form_round_trips_endpoints() {
        let mut chain = Chain::new();
        let hashes = grow_branch(&mut chain, None, 2);
        let view = chain.to_wire().unwrap();
        assert_eq!(view.appendages.len(), 1);
        assert_eq!(view.appendages[0].chain_length, 2);

        let head = Block::decode(&view.appendages[0].head).unwrap();
        let genesis = Block::decode(&view.appendages[0].genesis).unwrap();
        assert_eq!(head.hash, Some(hashes[1]));
        assert_eq!(genesis.hash, Some(hashes[0]));
    }
}
