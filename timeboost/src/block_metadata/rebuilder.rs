// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use timeboost_core::BlockMetadata;
use tokio::runtime::Builder;
use tracing::{error, info, warn};

use crate::storage::Storage;

use super::{BlockMetadataResponse, NumberAndBlockMetadata};

// Row cap per `missing_block_metadata` scan.
const MISSING_SCAN_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct BlockMetadataRebuilderConfig {
    /// Base URL of a node serving `GET /block_metadata`.
    pub source_url: String,
    pub sync_interval: Duration,
    /// Should not exceed the blocks limit of the source.
    pub api_blocks_limit: u64,
    pub request_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum RebuilderError {
    #[error("metadata source request failed: {0}")]
    Source(String),
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Splits ascending `missing` block numbers into queries whose span never exceeds `limit`
/// blocks. A single block is always a valid query even when `limit` is zero.
pub fn group_into_ranges(missing: &[u64], limit: u64) -> Vec<Vec<u64>> {
    let mut out = Vec::new();
    let mut query: Vec<u64> = Vec::new();
    for block_number in missing {
        query.push(*block_number);
        let mut end = query.len() - 1;
        let span = query[end] - query[0] + 1;
        if span >= limit {
            if span > limit && query.len() >= 2 {
                end -= 1;
            }
            let rest = query.split_off(end + 1);
            out.push(std::mem::replace(&mut query, rest));
        }
    }
    if !query.is_empty() {
        out.push(query);
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct RebuilderStop {
    shutdown: Arc<AtomicBool>,
}

impl RebuilderStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Fills in metadata for blocks marked missing by fetching it from another node.
pub struct BlockMetadataRebuilder {
    config: BlockMetadataRebuilderConfig,
    storage: Storage,
    http: reqwest::Client,
}

impl BlockMetadataRebuilder {
    pub fn new(
        config: BlockMetadataRebuilderConfig,
        storage: Storage,
    ) -> Result<Self, RebuilderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RebuilderError::Source(err.to_string()))?;
        Ok(Self {
            config,
            storage,
            http,
        })
    }

    pub async fn fetch(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<NumberAndBlockMetadata>, RebuilderError> {
        let url = format!(
            "{}/block_metadata",
            self.config.source_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(url)
            .query(&[("from", from), ("to", to)])
            .send()
            .await
            .map_err(|err| RebuilderError::Source(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RebuilderError::Source(format!("status {status}: {body}")));
        }
        let body: BlockMetadataResponse = response
            .json()
            .await
            .map_err(|err| RebuilderError::Source(err.to_string()))?;
        Ok(body.blocks)
    }

    /// Stores only the entries that were actually asked for.
    pub fn persist(
        &mut self,
        query: &[u64],
        result: Vec<NumberAndBlockMetadata>,
    ) -> Result<usize, RebuilderError> {
        let wanted: HashSet<u64> = query.iter().copied().collect();
        let entries: Vec<(u64, BlockMetadata)> = result
            .into_iter()
            .filter(|entry| wanted.contains(&entry.block_number))
            .map(|entry| {
                (
                    entry.block_number,
                    BlockMetadata::from_raw(entry.raw_metadata.to_vec()),
                )
            })
            .collect();
        self.storage.store_block_metadata(&entries)?;
        Ok(entries.len())
    }

    /// One pass over the missing set. Stops at the first failing query; the rest is picked
    /// up on the next pass.
    pub async fn update(&mut self) -> Result<usize, RebuilderError> {
        let missing = self.storage.missing_block_metadata(MISSING_SCAN_LIMIT)?;
        let mut stored = 0;
        for query in group_into_ranges(&missing, self.config.api_blocks_limit) {
            let (Some(first), Some(last)) = (query.first(), query.last()) else {
                continue;
            };
            let result = self.fetch(*first, *last).await?;
            stored += self.persist(&query, result)?;
        }
        Ok(stored)
    }

    /// Runs the sync loop on a dedicated thread with a current-thread runtime; storage is
    /// used synchronously on the same thread.
    pub fn run_blocking(self) -> (thread::JoinHandle<()>, RebuilderStop) {
        let stop = RebuilderStop::default();
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            let rt = match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(err) => {
                    error!(error = %err, "cannot build block metadata rebuilder runtime");
                    return;
                }
            };
            let mut rebuilder = self;
            info!(source = %rebuilder.config.source_url, "block metadata rebuilder started");
            while !thread_stop.is_shutdown_requested() {
                match rt.block_on(rebuilder.update()) {
                    Ok(0) => {}
                    Ok(stored) => info!(stored, "block metadata rebuilt"),
                    Err(err) => warn!(error = %err, "block metadata rebuild failed, will retry"),
                }
                thread::sleep(rebuilder.config.sync_interval);
            }
        });
        (handle, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SequencedTx;
    use alloy_primitives::{Address, B256, Bytes};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tx(seed: u8) -> SequencedTx {
        SequencedTx {
            tx_hash: B256::repeat_byte(seed),
            sender: Address::repeat_byte(seed),
            nonce: 0,
            raw: vec![seed],
            timeboosted: false,
            received_at: SystemTime::now(),
        }
    }

    fn temp_db_path(name: &str) -> String {
        let mut path = std::env::temp_dir();
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        path.push(format!("timeboost-rebuilder-{name}-{unique}.sqlite"));
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn ranges_respect_api_limit() {
        assert_eq!(
            group_into_ranges(&[1, 2, 3, 4, 5], 2),
            vec![vec![1, 2], vec![3, 4], vec![5]]
        );
        assert_eq!(
            group_into_ranges(&[1, 3, 10, 11, 30], 5),
            vec![vec![1, 3], vec![10, 11], vec![30]]
        );
        assert_eq!(group_into_ranges(&[7], 100), vec![vec![7]]);
        assert!(group_into_ranges(&[], 3).is_empty());
    }

    #[test]
    fn every_range_spans_at_most_limit() {
        let missing: Vec<u64> = (0..200).filter(|value| value % 3 != 0).collect();
        let groups = group_into_ranges(&missing, 7);
        let flattened: Vec<u64> = groups.iter().flatten().copied().collect();
        assert_eq!(flattened, missing);
        for group in groups {
            assert!(group[group.len() - 1] - group[0] < 7, "{group:?}");
        }
    }

    #[test]
    fn persist_ignores_blocks_not_requested() {
        let storage = Storage::open(&temp_db_path("persist"), "NORMAL").expect("open storage");
        let mut rebuilder = BlockMetadataRebuilder::new(
            BlockMetadataRebuilderConfig {
                source_url: "http://127.0.0.1:1".to_string(),
                sync_interval: Duration::from_secs(1),
                api_blocks_limit: 10,
                request_timeout: Duration::from_secs(1),
            },
            storage,
        )
        .expect("rebuilder");
        for seed in 1..=5 {
            rebuilder
                .storage
                .append_block_tracking_metadata_from(SystemTime::now(), &[tx(seed)], u64::MAX)
                .expect("append untracked block");
        }
        rebuilder
            .storage
            .mark_blocks_without_metadata_missing(4)
            .expect("mark missing");

        let stored = rebuilder
            .persist(
                &[4, 5],
                vec![
                    NumberAndBlockMetadata {
                        block_number: 4,
                        raw_metadata: Bytes::from_static(&[0, 1]),
                    },
                    NumberAndBlockMetadata {
                        block_number: 6,
                        raw_metadata: Bytes::from_static(&[0, 1]),
                    },
                ],
            )
            .expect("persist");
        assert_eq!(stored, 1);
        assert_eq!(
            rebuilder.storage.missing_block_metadata(10).expect("missing"),
            vec![5]
        );
        assert!(rebuilder.storage.block_metadata_range(6, 6).expect("range").is_empty());
    }
}
