// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod rebuilder;

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use timeboost_core::BlockMetadata;

use crate::sequencing_lane::{SequencerError, SequencerHandle};
use crate::storage::Storage;

pub use rebuilder::{
    BlockMetadataRebuilder, BlockMetadataRebuilderConfig, RebuilderError, RebuilderStop,
    group_into_ranges,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberAndBlockMetadata {
    pub block_number: u64,
    pub raw_metadata: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMetadataResponse {
    pub ok: bool,
    pub blocks: Vec<NumberAndBlockMetadata>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockMetadataApiConfig {
    /// Largest range a single request may span. Zero disables the limit.
    pub blocks_limit: u64,
    /// Entries kept in the LRU cache. Zero disables caching.
    pub cache_size: usize,
}

#[derive(Debug, Error)]
pub enum BlockMetadataError {
    #[error("invalid block range: from {from} is after to {to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("requested {requested} blocks, limit is {limit}")]
    BlocksLimitExceeded { limit: u64, requested: u64 },
    #[error("block metadata storage error")]
    Storage(#[from] rusqlite::Error),
    #[error("sequencer rollback failed: {0}")]
    Sequencer(#[from] SequencerError),
}

/// Bulk read access to timeboosted block metadata.
pub struct BlockMetadataApi {
    config: BlockMetadataApiConfig,
    storage: Mutex<Storage>,
    cache: Option<Mutex<LruCache<u64, BlockMetadata>>>,
}

impl BlockMetadataApi {
    pub fn new(config: BlockMetadataApiConfig, storage: Storage) -> Self {
        let cache = NonZeroUsize::new(config.cache_size).map(|size| Mutex::new(LruCache::new(size)));
        Self {
            config,
            storage: Mutex::new(storage),
            cache,
        }
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Metadata for every stored block in `[from, to]`, ascending. Blocks with no metadata
    /// are left out.
    pub fn get_raw_block_metadata(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<NumberAndBlockMetadata>, BlockMetadataError> {
        if from > to {
            return Err(BlockMetadataError::InvalidRange { from, to });
        }
        let requested = (to - from).saturating_add(1);
        if self.config.blocks_limit > 0 && requested > self.config.blocks_limit {
            return Err(BlockMetadataError::BlocksLimitExceeded {
                limit: self.config.blocks_limit,
                requested,
            });
        }

        if let Some(hit) = self.cached_range(from, to) {
            return Ok(hit);
        }

        let rows = self.storage().block_metadata_range(from, to)?;
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for (block_number, metadata) in &rows {
                cache.put(*block_number, metadata.clone());
            }
        }
        Ok(rows
            .into_iter()
            .map(|(block_number, metadata)| NumberAndBlockMetadata {
                block_number,
                raw_metadata: Bytes::from(metadata.into_bytes()),
            })
            .collect())
    }

    // Served from cache only when every block of the range is cached.
    fn cached_range(&self, from: u64, to: u64) -> Option<Vec<NumberAndBlockMetadata>> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = Vec::new();
        for block_number in from..=to {
            let metadata = cache.get(&block_number)?;
            out.push(NumberAndBlockMetadata {
                block_number,
                raw_metadata: Bytes::copy_from_slice(metadata.as_bytes()),
            });
        }
        Some(out)
    }

    /// Evicts cached entries above `block_number` after the chain was rolled back to it.
    /// Returns how many entries were evicted.
    pub fn reorg_to(&self, block_number: u64) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stale: Vec<u64> = cache
            .iter()
            .map(|(cached, _)| *cached)
            .filter(|cached| *cached > block_number)
            .collect();
        for cached in &stale {
            cache.pop(cached);
        }
        stale.len()
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| {
            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len()
        })
    }
}

/// Rolls the sequenced chain back to `block_number` and then drops the metadata cached for
/// the removed blocks. Returns the number of removed blocks.
pub async fn reorg_sequencer(
    sequencer: &SequencerHandle,
    api: &BlockMetadataApi,
    block_number: u64,
) -> Result<usize, BlockMetadataError> {
    let dropped = sequencer.reorg_to(block_number).await?;
    let evicted = api.reorg_to(block_number);
    tracing::info!(block_number, dropped, evicted, "block metadata reorged");
    Ok(dropped)
}
