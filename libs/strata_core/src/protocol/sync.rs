//! Startup chain acquisition.
//!
//! A node with at least one peer trusts the best-ranked one and walks its
//! appendages back to their geneses; a node on its own mines a genesis block
//! and starts a chain from scratch. Failures here are fatal: a node that
//! cannot acquire a chain has nothing to serve.

use tracing::instrument;

use crate::blockchain::chain::Appendage;
use crate::nodes::node::Node;
use crate::primitives::block::{Block, PreviousRef};
use crate::primitives::errors::{CodecError, SyncError};
use crate::protocol::{communication, pow};

use super::peers::Peer;

/// Brings up this node's chain: synchronize from the most trusted peer when
/// one exists, otherwise mine a fresh genesis.
pub async fn bootstrap(node: &Node) -> Result<(), SyncError> {
    let source = node
        .inner
        .peers
        .read()
        .await
        .list_others()
        .into_iter()
        .next();
    match source {
        Some(peer) => synchronize_from(node, &peer).await,
        None => mine_genesis(node).await,
    }
}

async fn mine_genesis(node: &Node) -> Result<(), SyncError> {
    let mut block = Block::new(PreviousRef::none(), Vec::new());
    if !pow::mine(&mut block, None).map_err(SyncError::Codec)? {
        return Err(SyncError::Incomplete(
            "genesis nonce search was interrupted".into(),
        ));
    }
    let hash = block.hash;
    node.inner.chain.write().await.insert_and_place(block);
    tracing::info!(hash = ?hash, "created genesis block");
    Ok(())
}

/// Fetches the peer's appendage summaries, then walks each one from its head
/// back to its genesis, pulling every block over `/v1/blocks/{hash}`.
#[instrument(skip_all, fields(peer = %peer.id))]
async fn synchronize_from(node: &Node, peer: &Peer) -> Result<(), SyncError> {
    tracing::info!(address = %peer.address, "syncing chain from peer");
    let view = communication::fetch_chain(&node.inner.client, &peer.address)
        .await
        .map_err(SyncError::Peer)?;
    tracing::info!(appendages = view.appendages.len(), "fetching appendage data");

    for entry in view.appendages {
        let head = Block::decode(&entry.head).map_err(SyncError::Codec)?;
        let genesis = Block::decode(&entry.genesis).map_err(SyncError::Codec)?;
        let head_hash = head
            .hash
            .ok_or(SyncError::Codec(CodecError::UnminedBlock))?;
        let genesis_hash = genesis
            .hash
            .ok_or(SyncError::Codec(CodecError::UnminedBlock))?;

        let mut current_hash = head_hash;
        let mut current_previous = head.previous;
        let mut length = 1u64;
        node.inner.chain.write().await.insert_block(head);
        tracing::debug!(head = %head_hash, "added appendage head");

        while current_hash != genesis_hash {
            let previous_hash = current_previous.hash().ok_or_else(|| {
                SyncError::Incomplete(format!(
                    "block {current_hash} has no predecessor but the genesis was never reached"
                ))
            })?;
            tracing::debug!(hash = %previous_hash, "fetching block");
            let block =
                communication::fetch_block(&node.inner.client, &peer.address, &previous_hash)
                    .await?;
            current_hash = block
                .hash
                .ok_or(SyncError::Codec(CodecError::UnminedBlock))?;
            current_previous = block.previous;
            node.inner.chain.write().await.insert_block(block);
            length += 1;
        }

        node.inner.chain.write().await.push_appendage(Appendage {
            genesis: genesis_hash,
            head: head_hash,
            length,
            updated_at: entry.updated_at,
        });
        tracing::info!(blocks = length, "fetched appendage");
    }
    Ok(())
}
