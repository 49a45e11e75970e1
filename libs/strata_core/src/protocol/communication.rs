//! Outbound HTTP: peer identity checks, chain fetches, and push gossip.
//!
//! Every call goes through one shared client with a 5 second timeout.
//! Gossip failures are absorbed here and only move the target peer's
//! ranking.

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use strata_crypto::hashing::BlockHash;

use crate::blockchain::chain::ChainView;
use crate::nodes::node::Node;
use crate::primitives::block::Block;
use crate::primitives::errors::{PeerError, SyncError};

use super::peers::{Peer, PEER_INVALID_RESPONSE_DECREMENT, PEER_OFFLINE_DECREMENT};

/// Header carrying `<id> <address>` of the calling node, so the receiver can
/// opportunistically learn about it.
pub const PEER_INFO_HEADER: &str = "X-Peer-Info";

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct PeerListEnvelope {
    peers: Vec<Peer>,
}

#[derive(Deserialize)]
struct BlockEnvelope {
    block: String,
}

/// Builds the client every outbound peer call goes through.
pub fn http_client() -> Result<Client, PeerError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| PeerError::Transport(e.to_string()))
}

fn transport(error: reqwest::Error) -> PeerError {
    PeerError::Transport(error.to_string())
}

fn invalid(error: reqwest::Error) -> PeerError {
    PeerError::InvalidResponse(error.to_string())
}

/// GET `{address}/v1/me`, optionally announcing ourselves in the process.
pub async fn fetch_peer_identity(
    client: &Client,
    address: &str,
    me: Option<&Peer>,
) -> Result<Peer, PeerError> {
    let mut request = client.get(format!("{address}/v1/me"));
    if let Some(me) = me {
        request = request.header(PEER_INFO_HEADER, me.header_value());
    }
    let response = request.send().await.map_err(transport)?;
    if response.status() != StatusCode::OK {
        return Err(PeerError::InvalidResponse(format!(
            "status {}",
            response.status()
        )));
    }
    response.json::<Peer>().await.map_err(invalid)
}

/// GET `{address}/v1/peers` and return whatever the peer advertises.
pub async fn fetch_advertised_peers(
    client: &Client,
    address: &str,
    me: &Peer,
) -> Result<Vec<Peer>, PeerError> {
    let response = client
        .get(format!("{address}/v1/peers"))
        .header(PEER_INFO_HEADER, me.header_value())
        .send()
        .await
        .map_err(transport)?;
    if response.status() != StatusCode::OK {
        return Err(PeerError::InvalidResponse(format!(
            "status {}",
            response.status()
        )));
    }
    let envelope = response.json::<PeerListEnvelope>().await.map_err(invalid)?;
    Ok(envelope.peers)
}

/// Asks a peer for its own identity and compares it against the record we
/// hold, erring on mismatch.
pub async fn verify_peer_identity(
    client: &Client,
    peer: &Peer,
    me: &Peer,
) -> Result<(), PeerError> {
    let reported = fetch_peer_identity(client, &peer.address, Some(me)).await?;
    if reported.id != peer.id {
        return Err(PeerError::IdentityMismatch {
            expected: peer.id,
            actual: reported.id,
        });
    }
    Ok(())
}

/// GET `{address}/v1/chain`.
pub async fn fetch_chain(client: &Client, address: &str) -> Result<ChainView, PeerError> {
    let response = client
        .get(format!("{address}/v1/chain"))
        .send()
        .await
        .map_err(transport)?;
    if response.status() != StatusCode::OK {
        return Err(PeerError::InvalidResponse(format!(
            "status {}",
            response.status()
        )));
    }
    response.json::<ChainView>().await.map_err(invalid)
}

/// GET `{address}/v1/blocks/{hash}` and decode the enclosed block.
pub async fn fetch_block(
    client: &Client,
    address: &str,
    hash: &BlockHash,
) -> Result<Block, SyncError> {
    let response = client
        .get(format!("{address}/v1/blocks/{}", hash.to_hex()))
        .send()
        .await
        .map_err(|e| SyncError::Peer(transport(e)))?;
    if response.status() != StatusCode::OK {
        return Err(SyncError::Peer(PeerError::InvalidResponse(format!(
            "status {}",
            response.status()
        ))));
    }
    let envelope = response
        .json::<BlockEnvelope>()
        .await
        .map_err(|e| SyncError::Peer(invalid(e)))?;
    Block::decode(&envelope.block).map_err(SyncError::Codec)
}

/// Pushes the exact serialized block bytes to every other peer.
pub async fn broadcast_block_bytes(node: &Node, bytes: &[u8]) {
    push_to_peers(node, "v1/blocks", bytes).await;
}

/// Pushes the exact serialized transaction bytes to every other peer.
pub async fn broadcast_transaction_bytes(node: &Node, bytes: &[u8]) {
    push_to_peers(node, "v1/transactions", bytes).await;
}

async fn push_to_peers(node: &Node, path: &str, bytes: &[u8]) {
    let others = node.inner.peers.read().await.list_others();
    for peer in others {
        let result = node
            .inner
            .client
            .post(format!("{}/{}", peer.address, path))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(bytes.to_vec())
            .send()
            .await;
        match result {
            Err(error) => {
                tracing::warn!(peer = %peer.id, %error, "failed to push to peer");
                node.inner
                    .peers
                    .write()
                    .await
                    .decrement(&peer.id, PEER_OFFLINE_DECREMENT);
            }
            Ok(response) if response.status() != StatusCode::OK => {
                tracing::warn!(peer = %peer.id, status = %response.status(), "peer rejected push");
                node.inner
                    .peers
                    .write()
                    .await
                    .decrement(&peer.id, PEER_INVALID_RESPONSE_DECREMENT);
            }
            Ok(_) => {}
        }
    }
}
