// Proof of work: SHA3-256 over the block preimage against a difficulty
// target of `1 << (255 - difficulty)`.
//
// Preimage layout:
//   previous_hash || bundle_root || be(timestamp, 8) || difficulty || be(nonce, 8)
//
// Both `run` and `validate` are pure; neither mutates the block.

use primitive_types::U256;
use tracing::info;

use crate::crypto::hash::{hash_sha3_256, HASH_BYTES};
use crate::primitives::block::{Block, BlockInfo, TxBundle};

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 254;

/// Accepted-minus-offered interval bounds driving retargeting, in ms.
pub const MINE_THRESHOLD_MAX: i64 = 5100;
pub const MINE_THRESHOLD_MIN: i64 = 4900;

pub fn clamp_difficulty(difficulty: u8) -> u8 {
    difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Big-endian 256-bit target; a valid hash is strictly below it.
pub fn target(difficulty: u8) -> U256 {
    U256::one() << (255 - clamp_difficulty(difficulty) as usize)
}

/// One retargeting step from the measured offer-to-acceptance interval:
/// blocks arriving too slowly lower the difficulty, too quickly raise it.
pub fn retarget(difficulty: u8, elapsed_ms: i64) -> u8 {
    let next = if elapsed_ms > MINE_THRESHOLD_MAX {
        difficulty.saturating_sub(1)
    } else if elapsed_ms < MINE_THRESHOLD_MIN {
        difficulty.saturating_add(1)
    } else {
        difficulty
    };
    clamp_difficulty(next)
}

pub struct ProofOfWork<'a> {
    block: &'a Block,
    difficulty: u8,
    target: U256,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        let difficulty = clamp_difficulty(block.info.difficulty);
        ProofOfWork {
            block,
            difficulty,
            target: target(difficulty),
        }
    }

    fn preimage(&self, bundle_root: &[u8; HASH_BYTES], nonce: u64) -> Vec<u8> {
        let prev = &self.block.info.previous_block_hash;
        let mut data = Vec::with_capacity(prev.len() + HASH_BYTES + 8 + 1 + 8);
        data.extend_from_slice(prev);
        data.extend_from_slice(bundle_root);
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.push(self.difficulty);
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Search nonces from zero until the digest meets the target.
    pub fn run(&self) -> Result<(u64, [u8; HASH_BYTES]), serde_json::Error> {
        let bundle_root = self.block.bundle.hash_transactions()?;

        info!("mining a new block");
        let mut nonce: u64 = 0;
        loop {
            let hash = hash_sha3_256(&self.preimage(&bundle_root, nonce));
            if U256::from_big_endian(&hash) < self.target {
                info!("mined hash: {}", hex::encode(hash));
                return Ok((nonce, hash));
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Recompute the digest for the recorded nonce and check the target.
    pub fn validate(&self) -> Result<bool, serde_json::Error> {
        let bundle_root = self.block.bundle.hash_transactions()?;
        let hash = hash_sha3_256(&self.preimage(&bundle_root, self.block.nonce));
        Ok(U256::from_big_endian(&hash) < self.target)
    }
}

/// Construct a block over the bundle and mine it to completion.
pub fn mine_block(bundle: TxBundle, info: BlockInfo) -> Result<Block, serde_json::Error> {
    let mut block = Block::new(bundle, info);
    let (nonce, hash) = ProofOfWork::new(&block).run()?;
    block.nonce = nonce;
    block.hash = hash.to_vec();
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn easy_block() -> Block {
        let info = BlockInfo {
            height: 1,
            difficulty: 8,
            previous_block_hash: vec![0xAA; 32],
        };
        Block::new(TxBundle::default(), info)
    }

    #[test]
    fn test_target_formula() {
        assert_eq!(target(20), U256::one() << 235);
        assert_eq!(target(1), U256::one() << 254);
        // out-of-range difficulties clamp instead of wrapping
        assert_eq!(target(0), U256::one() << 254);
        assert_eq!(target(255), U256::one() << 1);
    }

    #[test]
    fn test_run_then_validate() {
        let mut block = easy_block();
        let (nonce, hash) = ProofOfWork::new(&block).run().unwrap();
        block.nonce = nonce;
        block.hash = hash.to_vec();
        assert!(ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn test_wrong_nonce_fails_validation() {
        let mut block = easy_block();
        let (nonce, _) = ProofOfWork::new(&block).run().unwrap();
        block.nonce = nonce.wrapping_add(1);
        // one past the first valid nonce is almost surely invalid at
        // difficulty 8; re-run to be certain rather than assume
        let pow = ProofOfWork::new(&block);
        let hash = hash_sha3_256(&pow.preimage(
            &block.bundle.hash_transactions().unwrap(),
            block.nonce,
        ));
        let expected = U256::from_big_endian(&hash) < pow.target;
        assert_eq!(pow.validate().unwrap(), expected);
    }

    #[test]
    fn test_mine_block_fills_proof() {
        let info = BlockInfo {
            height: 0,
            difficulty: 8,
            previous_block_hash: vec![],
        };
        let block = mine_block(TxBundle::default(), info).unwrap();
        assert_eq!(block.hash.len(), 32);
        assert!(ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn test_retarget_boundaries() {
        assert_eq!(retarget(20, 4899), 21);
        assert_eq!(retarget(20, 4900), 20);
        assert_eq!(retarget(20, 5000), 20);
        assert_eq!(retarget(20, 5100), 20);
        assert_eq!(retarget(20, 5101), 19);
    }

    #[test]
    fn test_retarget_clamps() {
        assert_eq!(retarget(MIN_DIFFICULTY, 10_000), MIN_DIFFICULTY);
        assert_eq!(retarget(MAX_DIFFICULTY, 0), MAX_DIFFICULTY);
    }
}
