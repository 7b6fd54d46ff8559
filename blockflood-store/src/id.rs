//! Block identifiers.
//!
//! A [`BlockId`] is the opaque token under which the store keys a staged block. It is derived from
//! a block index by base64-encoding the index as four big-endian bytes, so every identifier of a
//! blob has the same length (8 characters) as the store requires.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{StoreError, StoreResult};

/// Length in characters of every encoded [`BlockId`].
pub const BLOCK_ID_LEN: usize = 8;

/// The store-side identifier of a single staged block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(String);

impl BlockId {
    /// Encodes a block index into its identifier.
    pub fn encode(index: u32) -> Self {
        Self(STANDARD.encode(index.to_be_bytes()))
    }

    /// Decodes the block index back out of this identifier.
    pub fn decode(&self) -> StoreResult<u32> {
        Self::decode_str(&self.0)
    }

    /// Parses an identifier as returned by the store, validating that it encodes an index.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        Self::decode_str(raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Wraps an identifier exactly as listed by the store.
    ///
    /// Stores may hold blocks staged by other writers, so listings are not validated.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the encoded identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn decode_str(raw: &str) -> StoreResult<u32> {
        if raw.len() != BLOCK_ID_LEN {
            return Err(StoreError::InvalidBlockId(raw.to_owned()));
        }
        let bytes = STANDARD
            .decode(raw)
            .map_err(|_| StoreError::InvalidBlockId(raw.to_owned()))?;
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidBlockId(raw.to_owned()))?;
        Ok(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the ordered list of identifiers for the indices `0..total`.
///
/// The order of this list defines the byte layout of the committed blob.
pub fn commit_list(total: u32) -> Vec<BlockId> {
    (0..total).map(BlockId::encode).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn boundaries_round_trip() {
        for index in [0, 1, 255, 256, 49_999, 50_000, u32::MAX - 1, u32::MAX] {
            let id = BlockId::encode(index);
            assert_eq!(id.as_str().len(), BLOCK_ID_LEN);
            assert_eq!(id.decode().unwrap(), index);
        }
    }

    #[test]
    fn strided_indices_round_trip() {
        // Large odd stride walks through every byte position of the index.
        let mut index = 0u32;
        for _ in 0..100_000 {
            let id = BlockId::encode(index);
            assert_eq!(BlockId::parse(id.as_str()).unwrap().decode().unwrap(), index);
            index = index.wrapping_add(42_949);
        }
    }

    #[test]
    fn distinct_indices_give_distinct_ids() {
        let ids: HashSet<_> = (0..50_000).map(BlockId::encode).collect();
        assert_eq!(ids.len(), 50_000);
    }

    #[test]
    fn rejects_foreign_ids() {
        assert!(BlockId::parse("").is_err());
        assert!(BlockId::parse("AAAAAA==AA").is_err());
        // Valid base64 but six bytes long.
        assert!(BlockId::parse("AAAAAAAA").is_err());
        assert!(BlockId::parse("!!!!!!==").is_err());
    }

    #[test]
    fn commit_list_is_ascending() {
        let list = commit_list(1024);
        assert_eq!(list.len(), 1024);
        let indices: Vec<_> = list.iter().map(|id| id.decode().unwrap()).collect();
        assert!(indices.windows(2).all(|w| w[0] + 1 == w[1]));
        assert_eq!(indices[0], 0);
    }
}
