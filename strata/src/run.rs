//! The node's HTTP surface.
//!
//! Every handler converts internal failures into an `{"error": ...}` body;
//! nothing a peer or client sends can take the node down. Ingest endpoints
//! verify before accepting and gossip the exact received bytes onward on
//! first acceptance only.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use strata_core::nodes::node::Node;
use strata_core::primitives::block::Block;
use strata_core::primitives::transaction::Transaction;
use strata_core::protocol::communication::{self, PEER_INFO_HEADER};
use strata_core::protocol::peers::{self, parse_peer_info};
use strata_crypto::hashing::BlockHash;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Clone)]
struct AppState {
    node: Node,
}

pub fn router(node: Node) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/v1/blocks", post(post_block))
        .route("/v1/blocks/{hash}", get(get_block))
        .route("/v1/chain", get(get_chain))
        .route("/v1/mempool", get(get_mempool))
        .route("/v1/me", get(get_me))
        .route("/v1/peers", get(get_peers))
        .route("/v1/transactions", post(post_transaction))
        .with_state(AppState { node })
}

/// Serves the node's HTTP surface until interrupted, while the peer
/// management task connects, syncs, and launches the mining loop in the
/// background. A failed startup exits the process; a node that cannot
/// acquire a chain has nothing to serve.
pub async fn run_node(address: String, seed_addresses: Vec<String>) -> Result<(), ()> {
    let seed_addresses: Vec<String> = seed_addresses
        .iter()
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty())
        .collect();

    let node = Node::new(address.clone())
        .map_err(|error| tracing::error!(%error, "failed to create node"))?;

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|error| tracing::error!(%error, port, "failed to bind listener"))?;
    tracing::info!(%address, port, "node is listening");

    let startup_node = node.clone();
    tokio::spawn(async move {
        if let Err(error) = startup_node.start(&seed_addresses).await {
            tracing::error!(%error, "failed to start node");
            std::process::exit(1);
        }
    });

    let app = router(node.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(node))
        .await
        .map_err(|error| tracing::error!(%error, "server error"))?;
    Ok(())
}

async fn shutdown_signal(node: Node) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
    node.stop().await;
}

async fn banner() -> &'static str {
    "strata: a small proof-of-work ledger.\n"
}

/// Ingests a serialized block from a peer, placing and re-gossiping it on
/// first acceptance. A duplicate is not an error; it is just not forwarded
/// again.
async fn post_block(State(state): State<AppState>, body: String) -> Json<Value> {
    let block = match Block::decode(&body) {
        Ok(block) => block,
        Err(error) => return Json(json!({"error": format!("cannot parse block: {error}")})),
    };
    match block.verify() {
        Ok(true) => {}
        Ok(false) => {
            return Json(json!({"error": "block could not be validated, rejecting"}));
        }
        Err(error) => return Json(json!({"error": format!("cannot verify block: {error}")})),
    }
    let inserted = state.node.inner.chain.write().await.insert_and_place(block);
    if inserted {
        communication::broadcast_block_bytes(&state.node, body.as_bytes()).await;
    }
    Json(json!({"status": "ok"}))
}

async fn get_chain(State(state): State<AppState>) -> Json<Value> {
    let view = match state.node.inner.chain.read().await.to_wire() {
        Ok(view) => view,
        Err(error) => {
            return Json(json!({"error": format!("cannot serialize chain: {error}")}));
        }
    };
    match serde_json::to_value(view) {
        Ok(value) => Json(value),
        Err(error) => Json(json!({"error": format!("cannot serialize chain: {error}")})),
    }
}

async fn get_block(Path(hash): Path<String>, State(state): State<AppState>) -> Json<Value> {
    let hash = match BlockHash::from_hex(&hash) {
        Ok(hash) => hash,
        Err(error) => return Json(json!({"error": format!("cannot parse block hash: {error}")})),
    };
    let chain = state.node.inner.chain.read().await;
    match chain.block_with_hash(&hash) {
        None => Json(json!({"error": "block not found"})),
        Some(block) => match block.encode() {
            Ok(encoded) => Json(json!({"block": encoded})),
            Err(error) => Json(json!({"error": format!("cannot serialize block: {error}")})),
        },
    }
}

async fn get_mempool(State(state): State<AppState>) -> Json<Value> {
    let view = match state.node.inner.mempool.lock().await.to_wire() {
        Ok(view) => view,
        Err(error) => {
            return Json(json!({"error": format!("cannot serialize mempool: {error}")}));
        }
    };
    match serde_json::to_value(view) {
        Ok(value) => Json(value),
        Err(error) => Json(json!({"error": format!("cannot serialize mempool: {error}")})),
    }
}

async fn get_me(State(state): State<AppState>) -> Json<Value> {
    let me = state.node.inner.peers.read().await.me.clone();
    Json(json!(me))
}

/// Lists the ranked peers, and registers the caller first when it announced
/// itself with a valid `X-Peer-Info` header.
async fn get_peers(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    register_caller(&state.node, &headers).await;
    let peers = state.node.inner.peers.read().await.list();
    Json(json!({ "peers": peers }))
}

async fn register_caller(node: &Node, headers: &HeaderMap) {
    let Some(value) = headers.get(PEER_INFO_HEADER) else {
        return;
    };
    let Ok(value) = value.to_str() else {
        tracing::warn!("ignoring non-text X-Peer-Info header");
        return;
    };
    let Some((id, address)) = parse_peer_info(value) else {
        tracing::warn!(%value, "ignoring malformed X-Peer-Info header");
        return;
    };
    if node.inner.peers.read().await.has(&id) {
        return;
    }
    // register whatever identity actually answers at the claimed address
    if let Err(error) = peers::insert_by_address(node, address).await {
        tracing::warn!(%error, "failed to get info for calling peer");
    }
}

/// Ingests a serialized transaction from a client or a peer, gossiping it
/// onward on first acceptance.
async fn post_transaction(State(state): State<AppState>, body: String) -> Json<Value> {
    let transaction = match Transaction::decode(&body) {
        Ok(transaction) => transaction,
        Err(error) => {
            return Json(json!({"error": format!("cannot parse transaction: {error}")}));
        }
    };
    match transaction.verify() {
        Ok(true) => {}
        Ok(false) => {
            return Json(json!({"error": "transaction signature is invalid, rejecting"}));
        }
        Err(error) => {
            return Json(json!({"error": format!("cannot verify transaction: {error}")}));
        }
    }
    let submitted = state.node.inner.mempool.lock().await.submit(transaction);
    if submitted {
        communication::broadcast_transaction_bytes(&state.node, body.as_bytes()).await;
    }
    Json(json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use strata_core::primitives::block::PreviousRef;
    use strata_crypto::hashing::sha256;
    use strata_crypto::keys::generate;

    /// Boots a full node (tasks and all) and serves its HTTP surface on an
    /// ephemeral loopback port.
    async fn spawn_node(seeds: &[String]) -> (Node, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let node = Node::new(address.clone()).unwrap();
        // serve before starting so peers can sync from us right away
        let app = router(node.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        node.start(seeds).await.unwrap();
        (node, address)
    }

    fn signed_transaction(key: &RsaPrivateKey, data: &[u8]) -> Transaction {
        let mut transaction = Transaction::new(RsaPublicKey::from(key), 0, data.to_vec());
        transaction.sign(key).unwrap();
        transaction
    }

    #[tokio::test]
    async fn test_genesis_only_chain() {
        let (_node, address) = spawn_node(&[]).await;
        let client = reqwest::Client::new();

        let banner = client.get(&address).send().await.unwrap().text().await.unwrap();
        assert!(banner.contains("strata"));

        let chain: Value = client
            .get(format!("{address}/v1/chain"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let appendages = chain["appendages"].as_array().unwrap();
        assert_eq!(appendages.len(), 1);
        assert_eq!(appendages[0]["chain_length"], 1);
        assert_eq!(appendages[0]["genesis"], appendages[0]["head"]);

        let me: Value = client
            .get(format!("{address}/v1/me"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(me["id"].is_string());
        assert_eq!(me["address"], address);
    }

    #[tokio::test]
    async fn test_duplicate_transaction_suppression() {
        let (_node, address) = spawn_node(&[]).await;
        let client = reqwest::Client::new();
        let key = generate().unwrap();
        let bytes = signed_transaction(&key, b"hello").encode().unwrap();

        for _ in 0..2 {
            let response: Value = client
                .post(format!("{address}/v1/transactions"))
                .body(bytes.clone())
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(response["status"], "ok");
        }

        let mempool: Value = client
            .get(format!("{address}/v1/mempool"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(mempool["transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unverifiable_transaction_is_rejected() {
        let (node, address) = spawn_node(&[]).await;
        let client = reqwest::Client::new();
        let key = generate().unwrap();
        let mut transaction = signed_transaction(&key, b"original");
        // re-sign nothing; change the data out from under the signature
        transaction.data = b"tampered".to_vec();
        let bytes = transaction.encode().unwrap();

        let response: Value = client
            .post(format!("{address}/v1/transactions"))
            .body(bytes)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(response["error"].is_string());
        assert!(node.inner.mempool.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_block_leaves_the_chain_unchanged() {
        let (node, address) = spawn_node(&[]).await;
        let client = reqwest::Client::new();

        let mut block = Block::new(PreviousRef::none(), vec![]);
        block.hash = Some(sha256(b"not the payload digest"));
        let bytes = block.encode().unwrap();

        let response: Value = client
            .post(format!("{address}/v1/blocks"))
            .body(bytes)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(response["error"].is_string());

        let chain = node.inner.chain.read().await;
        assert_eq!(chain.block_count(), 1);
        assert_eq!(chain.appendages().len(), 1);
    }

    #[tokio::test]
    async fn test_block_lookup_by_hash() {
        let (node, address) = spawn_node(&[]).await;
        let client = reqwest::Client::new();
        let genesis_hash = node.inner.chain.read().await.appendages()[0].genesis;

        let found: Value = client
            .get(format!("{address}/v1/blocks/{}", genesis_hash.to_hex()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let encoded = found["block"].as_str().unwrap();
        assert_eq!(Block::decode(encoded).unwrap().hash, Some(genesis_hash));

        let missing: Value = client
            .get(format!("{address}/v1/blocks/{}", sha256(b"absent").to_hex()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(missing["error"].is_string());

        let invalid: Value = client
            .get(format!("{address}/v1/blocks/nothex"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(invalid["error"].is_string());
    }

    #[tokio::test]
    async fn test_two_node_gossip_and_convergence() {
        let (node_a, addr_a) = spawn_node(&[]).await;
        let (node_b, _addr_b) = spawn_node(&[addr_a.clone()]).await;

        // B synced A's genesis during startup
        let head_a = node_a.inner.chain.read().await.appendages()[0].head;
        {
            let chain_b = node_b.inner.chain.read().await;
            assert_eq!(chain_b.block_count(), 1);
            assert_eq!(chain_b.appendages()[0].head, head_a);
        }

        // B's startup discovery introduced it to A through /v1/peers
        assert_eq!(node_a.inner.peers.read().await.count(), 2);

        // keep only A mining so the converged head is deterministic
        node_b.stop().await;

        let client = reqwest::Client::new();
        let key = generate().unwrap();
        let bytes = signed_transaction(&key, b"hello").encode().unwrap();
        let response: Value = client
            .post(format!("{addr_a}/v1/transactions"))
            .body(bytes)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["status"], "ok");

        // the transaction reached B's mempool through push gossip
        assert_eq!(node_b.inner.mempool.lock().await.len(), 1);

        // within two mining intervals both nodes hold the same length-2 chain
        let mut converged = false;
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let chain_a = node_a.inner.chain.read().await;
            let chain_b = node_b.inner.chain.read().await;
            let primary_a = chain_a.primary_appendage();
            let primary_b = chain_b.primary_appendage();
            if let (Some(primary_a), Some(primary_b)) = (primary_a, primary_b) {
                if primary_a.length == 2
                    && primary_b.length == 2
                    && primary_a.head == primary_b.head
                {
                    converged = true;
                    break;
                }
            }
        }
        assert!(converged, "nodes did not converge on a length-2 chain");
        node_a.stop().await;
    }
}
