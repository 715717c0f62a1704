// Transaction mempool: base58(tx hash) -> transaction, behind a single
// mutex. Block candidates come out in ascending nonce order, sized to
// the largest power of two that fits the pool.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use crate::primitives::transaction::Transaction;

fn largest_power_of_two(n: usize) -> usize {
    let mut last = 0usize;
    let mut m = 1usize;
    while m <= n {
        last = m;
        m <<= 1;
    }
    last
}

#[derive(Default)]
pub struct TxPool {
    pool: Mutex<HashMap<String, Transaction>>,
}

impl TxPool {
    pub fn new() -> Self {
        TxPool::default()
    }

    pub fn len(&self) -> usize {
        self.pool.lock().expect("mempool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pool
            .lock()
            .expect("mempool mutex poisoned")
            .contains_key(key)
    }

    /// No-op when the key already exists.
    pub fn append(&self, tx: &Transaction) {
        let mut pool = self.pool.lock().expect("mempool mutex poisoned");
        pool.entry(tx.pool_key()).or_insert_with(|| tx.clone());
    }

    /// Wallet-originated entries replace whatever is pooled.
    pub fn append_or_overwrite(&self, tx: &Transaction) {
        let mut pool = self.pool.lock().expect("mempool mutex poisoned");
        let key = tx.pool_key();
        if pool.contains_key(&key) {
            info!("key already exists, overwritten: {key}");
        }
        pool.insert(key, tx.clone());
    }

    /// Every pooled transaction, ascending by nonce.
    pub fn get_all(&self) -> Vec<Transaction> {
        let pool = self.pool.lock().expect("mempool mutex poisoned");
        let mut txs: Vec<Transaction> = pool.values().cloned().collect();
        txs.sort_by_key(|tx| tx.inner.nonce);
        txs
    }

    /// First `n` transactions in ascending nonce order.
    pub fn get(&self, n: usize) -> Vec<Transaction> {
        let mut txs = self.get_all();
        txs.truncate(n);
        txs
    }

    /// Candidate set for the next block: nothing from an empty pool, the
    /// single element from a pool of one, otherwise the largest power of
    /// two not exceeding the pool size.
    pub fn get_transaction_for_block(&self) -> Vec<Transaction> {
        let len = self.len();
        match len {
            0 => vec![],
            1 => self.get_all(),
            _ => self.get(largest_power_of_two(len)),
        }
    }

    pub fn batch_remove(&self, keys: &[String]) {
        let mut pool = self.pool.lock().expect("mempool mutex poisoned");
        for key in keys {
            pool.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::transaction::TxData;

    fn tx(nonce: u64, salt: u8) -> Transaction {
        let inner = TxData {
            data: vec![salt],
            public_key: vec![salt; 32],
            nonce,
            signature: vec![0; 64],
            timestamp: 1,
        };
        let hash = Transaction::compute_hash(&inner).unwrap();
        Transaction { hash, inner }
    }

    #[test]
    fn test_append_dedups() {
        let pool = TxPool::new();
        let t = tx(0, 1);
        pool.append(&t);
        pool.append(&t);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&t.pool_key()));
    }

    #[test]
    fn test_append_or_overwrite_replaces() {
        let pool = TxPool::new();
        let t = tx(0, 1);
        pool.append(&t);
        pool.append_or_overwrite(&t);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_get_all_sorted_by_nonce() {
        let pool = TxPool::new();
        pool.append(&tx(5, 1));
        pool.append(&tx(2, 2));
        pool.append(&tx(9, 3));
        let nonces: Vec<u64> = pool.get_all().iter().map(|t| t.inner.nonce).collect();
        assert_eq!(nonces, vec![2, 5, 9]);
    }

    #[test]
    fn test_candidate_sizes() {
        for (pool_size, expected) in [(0usize, 0usize), (1, 1), (3, 2), (5, 4), (8, 8)] {
            let pool = TxPool::new();
            for i in 0..pool_size {
                pool.append(&tx(i as u64, i as u8));
            }
            assert_eq!(
                pool.get_transaction_for_block().len(),
                expected,
                "pool of {pool_size}"
            );
        }
    }

    #[test]
    fn test_candidates_take_lowest_nonces() {
        let pool = TxPool::new();
        for i in 0..5u64 {
            pool.append(&tx(i, i as u8));
        }
        let nonces: Vec<u64> = pool
            .get_transaction_for_block()
            .iter()
            .map(|t| t.inner.nonce)
            .collect();
        assert_eq!(nonces, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_batch_remove() {
        let pool = TxPool::new();
        let a = tx(0, 1);
        let b = tx(1, 2);
        pool.append(&a);
        pool.append(&b);
        pool.batch_remove(&[a.pool_key()]);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&a.pool_key()));
        assert!(pool.contains(&b.pool_key()));
    }
}
