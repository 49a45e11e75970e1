//! Peer membership and the fixed-policy reputation system.
//!
//! Every peer starts at the default ranking and loses a point for each
//! failure; a peer that reaches zero is evicted into the untrusted set and
//! can never be re-added. Discovery runs only while the set is small and
//! rewards peers that introduce new valid peers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::nodes::node::Node;
use crate::primitives::errors::PeerError;
use crate::protocol::communication;

pub type PeerId = Uuid;

pub const DEFAULT_PEER_RANKING: u64 = 10;
pub const PEER_OFFLINE_DECREMENT: u64 = 1;
pub const PEER_INVALID_RESPONSE_DECREMENT: u64 = 1;
pub const PEER_NEW_VALID_PEER_INCREMENT: u64 = 2;
pub const MINIMUM_PEER_COUNT: usize = 3;
pub const IDEAL_PEER_COUNT: usize = 10;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub address: String,
}

impl Peer {
    /// The `X-Peer-Info` header value for this peer.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.id, self.address)
    }
}

/// Parses an `X-Peer-Info` header value into its id and address halves.
pub fn parse_peer_info(value: &str) -> Option<(PeerId, &str)> {
    let mut parts = value.splitn(2, ' ');
    let id = Uuid::parse_str(parts.next()?).ok()?;
    let address = parts.next()?;
    if address.is_empty() {
        return None;
    }
    Some((id, address))
}

/// The ranked peer membership of one node. `me` is always a member; a peer
/// id lives in either the ranked set or the untrusted set, never both.
#[derive(Debug)]
pub struct PeerSet {
    pub me: Peer,
    peers: HashMap<PeerId, Peer>,
    rankings: HashMap<PeerId, u64>,
    untrusted: HashSet<PeerId>,
}

impl PeerSet {
    pub fn new(address: String) -> Self {
        let me = Peer {
            id: Uuid::new_v4(),
            address,
        };
        let mut peers = HashMap::new();
        peers.insert(me.id, me.clone());
        let mut rankings = HashMap::new();
        rankings.insert(me.id, DEFAULT_PEER_RANKING);
        PeerSet {
            me,
            peers,
            rankings,
            untrusted: HashSet::new(),
        }
    }

    pub fn has(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn is_untrusted(&self, id: &PeerId) -> bool {
        self.untrusted.contains(id)
    }

    pub fn mark_untrusted(&mut self, id: PeerId) {
        self.untrusted.insert(id);
    }

    /// Ranked members, including me.
    pub fn count(&self) -> usize {
        self.rankings.len()
    }

    pub fn ranking(&self, id: &PeerId) -> Option<u64> {
        self.rankings.get(id).copied()
    }

    /// Registers a peer at the default ranking. Refuses peers already
    /// present, peers marked untrusted, and ourselves.
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.has(&peer.id) || self.is_untrusted(&peer.id) || peer.id == self.me.id {
            return false;
        }
        tracing::info!(peer = %peer.id, address = %peer.address, "new peer found");
        self.rankings.insert(peer.id, DEFAULT_PEER_RANKING);
        self.peers.insert(peer.id, peer);
        true
    }

    pub fn increment(&mut self, id: &PeerId, amount: u64) {
        if let Some(ranking) = self.rankings.get_mut(id) {
            *ranking += amount;
        }
        self.rank();
    }

    pub fn decrement(&mut self, id: &PeerId, amount: u64) {
        if let Some(ranking) = self.rankings.get_mut(id) {
            *ranking = ranking.saturating_sub(amount);
        }
        self.rank();
    }

    /// Deletes a peer from the ranked set without marking it untrusted.
    pub fn remove(&mut self, id: &PeerId) {
        self.peers.remove(id);
        self.rankings.remove(id);
    }

    /// Evicts every peer whose ranking has reached zero into the untrusted
    /// set, permanently.
    pub fn rank(&mut self) {
        let exhausted: Vec<PeerId> = self
            .rankings
            .iter()
            .filter(|(_, ranking)| **ranking == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in exhausted {
            tracing::info!(peer = %id, "peer exhausted its ranking, moving to untrusted");
            self.remove(&id);
            self.untrusted.insert(id);
        }
    }

    /// All ranked peers including me, best ranking first. Ties order by id so
    /// the listing is stable.
    pub fn list(&self) -> Vec<Peer> {
        let mut ranked: Vec<(&Peer, u64)> = self
            .peers
            .values()
            .filter_map(|peer| self.rankings.get(&peer.id).map(|r| (peer, *r)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        ranked.into_iter().map(|(peer, _)| peer.clone()).collect()
    }

    pub fn list_others(&self) -> Vec<Peer> {
        self.list()
            .into_iter()
            .filter(|peer| *peer != self.me)
            .collect()
    }
}

/// Asks `{address}/v1/me` who lives there and registers the answer.
///
/// The fetch completes before the peer set is locked.
pub async fn insert_by_address(node: &Node, address: &str) -> Result<bool, PeerError> {
    let peer = communication::fetch_peer_identity(&node.inner.client, address, None).await?;
    Ok(node.inner.peers.write().await.insert(peer))
}

/// One health-and-discovery pass over the peer set.
///
/// Health: every other peer gets a `/v1/me` probe carrying our own info.
/// Transport failures count as offline, bad answers as invalid, and an id
/// that changed since registration evicts the peer into untrusted. If the
/// ranked set is still at or below the minimum, discovery asks the remaining
/// peers for their peer lists, re-verifying each introducer before trusting
/// an introduction, until the ideal count is reached.
#[instrument(skip_all)]
pub async fn refresh(node: &Node) {
    let client = &node.inner.client;
    let me = node.inner.peers.read().await.me.clone();
    let others = node.inner.peers.read().await.list_others();
    if others.is_empty() {
        tracing::debug!("no other peers to check");
        return;
    }

    tracing::debug!(peers = others.len(), "checking peer health");
    for peer in &others {
        match communication::fetch_peer_identity(client, &peer.address, Some(&me)).await {
            Err(PeerError::Transport(reason)) => {
                tracing::warn!(peer = %peer.id, %reason, "peer is offline");
                node.inner
                    .peers
                    .write()
                    .await
                    .decrement(&peer.id, PEER_OFFLINE_DECREMENT);
            }
            Err(error) => {
                tracing::warn!(peer = %peer.id, %error, "peer health check failed");
                node.inner
                    .peers
                    .write()
                    .await
                    .decrement(&peer.id, PEER_INVALID_RESPONSE_DECREMENT);
            }
            Ok(reported) => {
                let mut peers = node.inner.peers.write().await;
                if peer.id == me.id {
                    peers.remove(&peer.id);
                } else if reported.id != peer.id {
                    tracing::warn!(peer = %peer.id, reported = %reported.id, "peer identity changed, evicting");
                    peers.remove(&peer.id);
                    peers.mark_untrusted(peer.id);
                }
            }
        }
    }

    let healthy = node.inner.peers.read().await.count();
    tracing::debug!(healthy, "peer health pass complete");
    if healthy > MINIMUM_PEER_COUNT {
        return;
    }

    tracing::debug!(wanted = IDEAL_PEER_COUNT, "trying to acquire more peers");
    let others = node.inner.peers.read().await.list_others();
    for peer in &others {
        let advertised =
            match communication::fetch_advertised_peers(client, &peer.address, &me).await {
                Err(PeerError::Transport(reason)) => {
                    tracing::warn!(peer = %peer.id, %reason, "peer went offline during discovery");
                    node.inner
                        .peers
                        .write()
                        .await
                        .decrement(&peer.id, PEER_OFFLINE_DECREMENT);
                    continue;
                }
                Err(error) => {
                    tracing::warn!(peer = %peer.id, %error, "peer list request failed");
                    node.inner
                        .peers
                        .write()
                        .await
                        .decrement(&peer.id, PEER_INVALID_RESPONSE_DECREMENT);
                    continue;
                }
                Ok(advertised) => advertised,
            };

        for candidate in advertised {
            // an introduction is only worth taking from a peer that still is
            // who it claims to be
            if let Err(error) = communication::verify_peer_identity(client, peer, &me).await {
                tracing::debug!(peer = %peer.id, %error, "introducer failed re-verification");
                continue;
            }
            let mut peers = node.inner.peers.write().await;
            if !peers.insert(candidate) {
                continue;
            }
            peers.increment(&peer.id, PEER_NEW_VALID_PEER_INCREMENT);
            let reached = peers.count() >= IDEAL_PEER_COUNT;
            drop(peers);
            if reached {
                tracing::info!("reached ideal peer count");
                node.inner.peers.write().await.rank();
                return;
            }
        }
    }

    node.inner.peers.write().await.rank();
}

/// Runs `refresh` every interval until the stop signal fires.
pub async fn refresh_loop(node: Node, stop_signal: flume::Receiver<()>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
            _ = stop_signal.recv_async() => {
                tracing::debug!("peer refresh loop stopping");
                break;
            }
        }
        refresh(&node).await;
    }
}
