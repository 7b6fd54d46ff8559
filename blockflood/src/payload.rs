//! The block payload shared by all uploads.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// The seed every instance uses, so all blocks of a blob carry the same bytes.
pub const PAYLOAD_SEED: u64 = 0x5eed;

/// Creates a block of `len` pseudo-random bytes.
///
/// Every block of a run carries the same content. Random bytes keep transparent compression on
/// the way to the store from shrinking the transfer.
pub fn random_block(len: usize, seed: u64) -> Bytes {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut buf = vec![0; len];
    rng.fill_bytes(&mut buf);
    buf.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_per_seed() {
        let a = random_block(1024, 7);
        assert_eq!(a.len(), 1024);
        assert_eq!(a, random_block(1024, 7));
        assert_ne!(a, random_block(1024, 8));
    }
}
