use serde::{Deserialize, Serialize};

use super::errors::CodecError;
use super::transaction::Transaction;

/// The queue of transactions waiting to be mined into a block.
///
/// Order of arrival is preserved; no two entries ever share an id.
#[derive(Debug, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

/// Wire form of the mempool: the canonical transaction strings, not their
/// structured representation.
#[derive(Serialize, Deserialize)]
pub struct MempoolView {
    pub transactions: Vec<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool {
            transactions: Vec::new(),
        }
    }

    /// Appends a transaction unless one with the same id is already queued.
    pub fn submit(&mut self, transaction: Transaction) -> bool {
        if self.transactions.iter().any(|t| t.id == transaction.id) {
            return false;
        }
        self.transactions.push(transaction);
        true
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Clones the queued transactions for block assembly.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn to_wire(&self) -> Result<MempoolView, CodecError> {
        let mut transactions = Vec::with_capacity(self.transactions.len());
        for transaction in &self.transactions {
            transactions.push(transaction.encode()?);
        }
        Ok(MempoolView { transactions })
    }
}
