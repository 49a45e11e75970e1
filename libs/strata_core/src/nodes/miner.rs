use std::time::Duration;

use tracing::instrument;

use crate::primitives::block::{Block, PreviousRef};
use crate::protocol::{communication, pow};

use super::node::Node;

pub const MINING_INTERVAL: Duration = Duration::from_secs(5);

/// Wakes every interval and mines the pending transactions onto the primary
/// appendage. The stop signal both ends the loop and aborts a nonce search
/// that is already underway.
pub async fn mining_loop(node: Node, stop_signal: flume::Receiver<()>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(MINING_INTERVAL) => {}
            _ = stop_signal.recv_async() => {
                tracing::debug!("mining loop stopping");
                break;
            }
        }
        if !mine_once(&node, Some(&stop_signal)).await {
            tracing::debug!("mining loop stopping");
            break;
        }
    }
}

/// One pass of the mining loop.
///
/// Drains nothing when the mempool is empty or no primary appendage exists
/// yet. Otherwise builds a block on the primary head, mines it, inserts it,
/// clears the mempool, and gossips the block bytes. Mining and serialization
/// errors are logged and the pass ends; only a cancelled nonce search
/// returns false.
#[instrument(skip_all)]
pub async fn mine_once(node: &Node, abort_signal: Option<&flume::Receiver<()>>) -> bool {
    let transactions = {
        let mempool = node.inner.mempool.lock().await;
        if mempool.is_empty() {
            return true;
        }
        mempool.snapshot()
    };
    let head = {
        let chain = node.inner.chain.read().await;
        match chain.primary_appendage() {
            Some(appendage) => appendage.head,
            None => {
                tracing::warn!("there is no primary appendage, cannot mine pending transactions");
                return true;
            }
        }
    };

    tracing::info!(transactions = transactions.len(), head = %head, "mining a new block");
    let mut block = Block::new(PreviousRef::from_hash(head), transactions);
    match pow::mine(&mut block, abort_signal) {
        Ok(true) => {}
        Ok(false) => return false,
        Err(error) => {
            tracing::error!(%error, "mining failed");
            return true;
        }
    }

    let bytes = match block.encode() {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!(%error, "cannot serialize mined block");
            return true;
        }
    };
    let hash = block.hash;

    let inserted = node.inner.chain.write().await.insert_and_place(block);
    if inserted {
        tracing::info!(hash = ?hash, "mined new block");
        // these transactions are in the new block now
        node.inner.mempool.lock().await.clear();
        communication::broadcast_block_bytes(node, bytes.as_bytes()).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::transaction::Transaction;
    use crate::protocol::sync;
    use rsa::RsaPublicKey;
    use strata_crypto::keys::generate;

    async fn node_with_genesis() -> Node {
        let node = Node::new("http://127.0.0.1:3000".into()).unwrap();
        sync::bootstrap(&node).await.unwrap();
        node
    }

    #[tokio::test]
    async fn test_empty_mempool_mines_nothing() {
        let node = node_with_genesis().await;
        assert!(mine_once(&node, None).await);
        assert_eq!(node.inner.chain.read().await.block_count(), 1);
    }

    #[tokio::test]
    async fn test_mining_extends_the_primary_and_clears_the_mempool() {
        let node = node_with_genesis().await;
        let key = generate().unwrap();
        let mut transaction = Transaction::new(RsaPublicKey::from(&key), 0, b"mine me".to_vec());
        transaction.sign(&key).unwrap();
        let id = transaction.id;
        assert!(node.inner.mempool.lock().await.submit(transaction));

        assert!(mine_once(&node, None).await);

        let chain = node.inner.chain.read().await;
        assert_eq!(chain.block_count(), 2);
        assert_eq!(chain.appendages().len(), 1);
        let appendage = &chain.appendages()[0];
        assert_eq!(appendage.length, 2);
        let head = chain.block_with_hash(&appendage.head).unwrap();
        assert!(head.verify().unwrap());
        assert_eq!(head.transactions.len(), 1);
        assert_eq!(head.transactions[0].id, id);
        drop(chain);

        assert!(node.inner.mempool.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_search_leaves_the_mempool_alone() {
        let node = node_with_genesis().await;
        let key = generate().unwrap();
        let mut transaction = Transaction::new(RsaPublicKey::from(&key), 0, b"stay".to_vec());
        transaction.sign(&key).unwrap();
        node.inner.mempool.lock().await.submit(transaction);

        let (abort, signal) = flume::bounded(1);
        abort.send(()).unwrap();
        assert!(!mine_once(&node, Some(&signal)).await);

        assert_eq!(node.inner.chain.read().await.block_count(), 1);
        assert_eq!(node.inner.mempool.lock().await.len(), 1);
    }
}
