use flume::Receiver;
use strata_crypto::hashing::BlockHash;

use crate::primitives::block::Block;
use crate::primitives::errors::CodecError;

/// The fixed difficulty target: the top 16 bits of the digest must be zero,
/// which is the same as the lowercase hex form starting with four '0's.
pub const PREFIX_ZERO_BITS: u32 = 16;

/// Tests a digest against the difficulty target by bit, not by hex text.
pub fn accepts(hash: &BlockHash) -> bool {
    let mut leading_zeros = 0;
    for byte in hash.as_bytes() {
        if *byte == 0 {
            leading_zeros += 8;
        } else {
            leading_zeros += byte.leading_zeros();
            break;
        }
    }
    leading_zeros >= PREFIX_ZERO_BITS
}

/// Searches nonces from zero until the payload digest is accepted, then
/// stores the digest as the block's hash.
///
/// The abort receiver is polled every iteration; an aborted search returns
/// Ok(false) and leaves the block unmined. The nonce space is u64 against a
/// 16-bit target, so exhaustion is statistically unreachable.
pub fn mine(block: &mut Block, abort_signal: Option<&Receiver<()>>) -> Result<bool, CodecError> {
    block.hash = None;
    for nonce in 0..u64::MAX {
        if let Some(signal) = abort_signal {
            if signal.try_recv().is_ok() {
                tracing::debug!(nonce, "nonce search aborted");
                return Ok(false);
            }
        }
        block.number = nonce;
        let digest = block.payload_digest()?;
        if accepts(&digest) {
            tracing::debug!(nonce, hash = %digest, "nonce search finished");
            block.hash = Some(digest);
            return Ok(true);
        }
        if nonce > 0 && nonce % 1000 == 0 {
            tracing::trace!(nonce, "nonce search in progress");
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::block::PreviousRef;
    use strata_crypto::hashing::sha256;

    #[test]
    fn test_accepts_requires_sixteen_zero_bits() {
        let mut bytes = [0u8; 32];
        bytes[2] = 0xff;
        assert!(accepts(&BlockHash::from(bytes)));

        bytes[1] = 0x01;
        assert!(!accepts(&BlockHash::from(bytes)));

        assert!(!accepts(&sha256(b"almost certainly not accepted")));
    }

    #[test]
    fn test_mining_an_empty_block_succeeds() {
        let mut block = Block::new(PreviousRef::none(), vec![]);
        assert!(mine(&mut block, None).unwrap());
        let hash = block.hash.unwrap();
        assert!(hash.to_hex().starts_with("0000"));
        assert!(block.verify().unwrap());
    }

    #[test]
    fn test_mined_hash_matches_payload_digest() {
        let mut block = Block::new(PreviousRef::none(), vec![]);
        assert!(mine(&mut block, None).unwrap());
        assert_eq!(block.payload_digest().unwrap(), block.hash.unwrap());
    }

    #[test]
    fn test_abort_stops_the_search() {
        let (abort, signal) = flume::bounded(1);
        abort.send(()).unwrap();
        let mut block = Block::new(PreviousRef::none(), vec![]);
        assert!(!mine(&mut block, Some(&signal)).unwrap());
        assert!(block.hash.is_none());
    }
}
