use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::blockchain::chain::Chain;
use crate::primitives::errors::{PeerError, SyncError};
use crate::primitives::mempool::Mempool;
use crate::protocol::peers::{self, PeerSet};
use crate::protocol::{communication, sync};

use super::miner;

/// The aggregates shared by the HTTP handlers, the peer refresh task, and
/// the mining task. Each aggregate sits behind its own lock; no caller
/// holds two of these locks at once.
pub struct NodeInner {
    pub chain: RwLock<Chain>,
    pub mempool: Mutex<Mempool>,
    pub peers: RwLock<PeerSet>,
    /// shared outbound client, 5 second timeout on every call
    pub client: reqwest::Client,
    /// one kill switch per long-lived task, filled in by `start`
    kill_switches: Mutex<Vec<flume::Sender<()>>>,
}

/// A cheaply cloneable handle on one running node.
#[derive(Clone)]
pub struct Node {
    pub inner: Arc<NodeInner>,
}

impl Node {
    /// Creates a node reachable at `address`, with a fresh identity and an
    /// empty chain.
    pub fn new(address: String) -> Result<Self, PeerError> {
        let client = communication::http_client()?;
        Ok(Node {
            inner: Arc::new(NodeInner {
                chain: RwLock::new(Chain::new()),
                mempool: Mutex::new(Mempool::new()),
                peers: RwLock::new(PeerSet::new(address)),
                client,
                kill_switches: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Connects to the well-known peers, acquires a chain, and launches the
    /// peer refresh and mining tasks.
    ///
    /// An unreachable seed peer or a failed chain sync is fatal; a node that
    /// cannot get this far has nothing to serve.
    pub async fn start(&self, seed_addresses: &[String]) -> Result<(), SyncError> {
        for address in seed_addresses {
            tracing::info!(%address, "connecting to well-known peer");
            let inserted = peers::insert_by_address(self, address)
                .await
                .map_err(SyncError::Peer)?;
            if !inserted {
                tracing::debug!(%address, "peer was already known");
            }
        }
        if !seed_addresses.is_empty() {
            peers::refresh(self).await;
            let count = self.inner.peers.read().await.count();
            tracing::info!(peers = count, "peer set configured");
        }

        sync::bootstrap(self).await?;

        let (kill_refresh, refresh_signal) = flume::bounded(1);
        let (kill_miner, miner_signal) = flume::bounded(1);
        tokio::spawn(peers::refresh_loop(self.clone(), refresh_signal));
        tokio::spawn(miner::mining_loop(self.clone(), miner_signal));
        let mut kill_switches = self.inner.kill_switches.lock().await;
        kill_switches.push(kill_refresh);
        kill_switches.push(kill_miner);
        tracing::info!("node tasks are running");
        Ok(())
    }

    /// Signals the refresh and mining tasks, and any in-flight nonce search,
    /// to stop.
    pub async fn stop(&self) {
        for kill in self.inner.kill_switches.lock().await.iter() {
            let _ = kill.send(());
        }
        tracing::info!("node stopping");
    }
}
