// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::{SequencedTx, Storage};

use super::{
    PendingReorg, PendingTx, SequencedReceipt, SequencerError, SequencingLaneError,
    SequencingLaneInput,
};

#[derive(Debug, Clone, Copy)]
pub struct SequencingLaneConfig {
    pub chain_id: u64,
    pub max_txs_per_block: usize,
    pub idle_poll_interval: Duration,
    /// First block that gets timeboosted metadata. Blocks at or above it that were stored
    /// without metadata are marked missing at startup.
    pub track_block_metadata_from: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SequencingLaneStop {
    shutdown: Arc<AtomicBool>,
}

impl SequencingLaneStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Single writer that turns the transaction queue into blocks.
///
/// Every drained chunk becomes one block; a transaction is acknowledged only after its
/// block and metadata are committed.
pub struct SequencingLane {
    rx: mpsc::Receiver<SequencingLaneInput>,
    stop: SequencingLaneStop,
    storage: Storage,
    config: SequencingLaneConfig,
    nonces: HashMap<Address, u64>,
    // Applied after the block of the chunk it arrived in is committed.
    reorg: Option<PendingReorg>,
}

impl SequencingLane {
    pub fn new(
        rx: mpsc::Receiver<SequencingLaneInput>,
        storage: Storage,
        config: SequencingLaneConfig,
    ) -> Self {
        Self {
            rx,
            stop: SequencingLaneStop::default(),
            storage,
            config,
            nonces: HashMap::new(),
            reorg: None,
        }
    }

    pub fn spawn(self) -> (JoinHandle<SequencingLaneError>, SequencingLaneStop) {
        let stop = self.stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut lane = self;
            match lane.run_forever() {
                Err(err) => err,
                Ok(()) => unreachable!("sequencing lane run loop is expected to be non-terminating"),
            }
        });
        (handle, stop)
    }

    fn run_forever(&mut self) -> Result<(), SequencingLaneError> {
        self.nonces = self
            .storage
            .load_sender_next_nonces()
            .map_err(|source| SequencingLaneError::LoadNonces { source })?;
        let marked = self
            .storage
            .mark_blocks_without_metadata_missing(self.config.track_block_metadata_from)
            .map_err(|source| SequencingLaneError::MarkMissingMetadata { source })?;
        info!(
            senders = self.nonces.len(),
            missing_metadata = marked,
            "sequencing lane started"
        );

        let max_chunk = self.config.max_txs_per_block.max(1);
        let mut included = Vec::with_capacity(max_chunk);

        while !self.stop.is_shutdown_requested() {
            let dequeued = self.dequeue_and_validate_chunk(max_chunk, &mut included)?;
            self.commit_block(&mut included)?;
            if let Some(reorg) = self.reorg.take() {
                self.apply_reorg(reorg)?;
            }

            if dequeued == 0 {
                thread::sleep(self.config.idle_poll_interval);
            }
        }

        Err(SequencingLaneError::ShutdownRequested)
    }

    fn dequeue_and_validate_chunk(
        &mut self,
        max_chunk: usize,
        included: &mut Vec<(PendingTx, SequencedTx)>,
    ) -> Result<usize, SequencingLaneError> {
        let mut dequeued = 0_usize;
        while dequeued < max_chunk {
            match self.rx.try_recv() {
                Ok(SequencingLaneInput::Tx(item)) => {
                    dequeued = dequeued.saturating_add(1);
                    match validate_raw_tx(&item, self.config.chain_id, &mut self.nonces) {
                        Ok(sequenced) => included.push((item, sequenced)),
                        Err(reason) => {
                            debug!(%reason, "rejected transaction");
                            let _ = item.respond_to.send(Err(SequencerError::invalid(reason)));
                        }
                    }
                }
                Ok(SequencingLaneInput::Reorg(reorg)) => {
                    dequeued = dequeued.saturating_add(1);
                    self.reorg = Some(reorg);
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if dequeued == 0 {
                        return Err(SequencingLaneError::ChannelClosed);
                    }
                    break;
                }
            }
        }
        Ok(dequeued)
    }

    fn commit_block(
        &mut self,
        included: &mut Vec<(PendingTx, SequencedTx)>,
    ) -> Result<(), SequencingLaneError> {
        if included.is_empty() {
            return Ok(());
        }

        let txs: Vec<SequencedTx> = included.iter().map(|(_, tx)| tx.clone()).collect();
        let block_number = match self.storage.append_block_tracking_metadata_from(
            SystemTime::now(),
            &txs,
            self.config.track_block_metadata_from,
        ) {
            Ok(value) => value,
            Err(source) => {
                let message = format!("db error: {source}");
                for (item, _) in included.drain(..) {
                    let _ = item
                        .respond_to
                        .send(Err(SequencerError::internal(message.clone())));
                }
                return Err(SequencingLaneError::AppendBlock { source });
            }
        };

        debug!(block_number, tx_count = txs.len(), "block committed");
        for (tx_index, (item, sequenced)) in included.drain(..).enumerate() {
            let _ = item.respond_to.send(Ok(SequencedReceipt {
                tx_hash: sequenced.tx_hash,
                sender: sequenced.sender,
                nonce: sequenced.nonce,
                block_number,
                tx_index: u32::try_from(tx_index).unwrap_or(u32::MAX),
                timeboosted: sequenced.timeboosted,
            }));
        }
        Ok(())
    }

    fn apply_reorg(&mut self, reorg: PendingReorg) -> Result<(), SequencingLaneError> {
        let dropped = match self.storage.reorg_to(reorg.to_block) {
            Ok(value) => value,
            Err(err) => {
                warn!(to_block = reorg.to_block, error = %err, "reorg failed");
                let _ = reorg
                    .respond_to
                    .send(Err(SequencerError::internal(format!("db error: {err}"))));
                return Ok(());
            }
        };
        self.nonces = self
            .storage
            .load_sender_next_nonces()
            .map_err(|source| SequencingLaneError::LoadNonces { source })?;
        info!(to_block = reorg.to_block, dropped, "sequenced chain rolled back");
        let _ = reorg.respond_to.send(Ok(dropped));
        Ok(())
    }
}

/// Decodes an EIP-2718 envelope, recovers its sender and checks the nonce against `nonces`.
/// On success the sender's expected nonce is advanced.
pub fn validate_raw_tx(
    item: &PendingTx,
    chain_id: u64,
    nonces: &mut HashMap<Address, u64>,
) -> Result<SequencedTx, String> {
    let mut buf = item.raw.as_ref();
    let envelope = TxEnvelope::decode_2718(&mut buf)
        .map_err(|err| format!("cannot decode transaction: {err}"))?;
    if !buf.is_empty() {
        return Err(format!(
            "trailing {} bytes after transaction",
            buf.len()
        ));
    }

    if let Some(tx_chain_id) = envelope.chain_id()
        && tx_chain_id != chain_id
    {
        return Err(format!(
            "wrong chain id: expected {chain_id}, got {tx_chain_id}"
        ));
    }

    let sender = envelope
        .recover_signer()
        .map_err(|err| format!("cannot recover sender: {err}"))?;

    let expected = nonces.get(&sender).copied().unwrap_or(0);
    let nonce = envelope.nonce();
    if nonce != expected {
        return Err(format!("invalid nonce: expected {expected}, got {nonce}"));
    }
    nonces.insert(sender, expected.saturating_add(1));

    Ok(SequencedTx {
        tx_hash: *envelope.tx_hash(),
        sender,
        nonce,
        raw: item.raw.to_vec(),
        timeboosted: item.timeboosted,
        received_at: item.received_at,
    })
}
