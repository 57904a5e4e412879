// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::{Duration, SystemTime};

use alloy_primitives::Bytes;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot;

use super::{PendingReorg, PendingTx, SequencedReceipt, SequencerError, SequencingLaneInput};

/// Hands raw transactions to the sequencer and waits for their inclusion.
#[async_trait]
pub trait TransactionPublisher: Send + Sync {
    async fn publish_transaction(
        &self,
        raw: Bytes,
        timeboosted: bool,
    ) -> Result<SequencedReceipt, SequencerError>;
}

#[derive(Debug, Clone)]
pub struct SequencerHandle {
    tx_sender: mpsc::Sender<SequencingLaneInput>,
    queue_timeout: Duration,
}

impl SequencerHandle {
    pub fn new(tx_sender: mpsc::Sender<SequencingLaneInput>, queue_timeout: Duration) -> Self {
        Self {
            tx_sender,
            queue_timeout,
        }
    }

    async fn enqueue(&self, input: SequencingLaneInput) -> Result<(), SequencerError> {
        match self
            .tx_sender
            .send_timeout(input, self.queue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SequencerError::overloaded("queue full")),
            Err(SendTimeoutError::Closed(_)) => {
                Err(SequencerError::internal("sequencing lane unavailable"))
            }
        }
    }

    /// Drops every block above `to_block`. Transactions queued before the call are
    /// committed first; later ones are validated against the rolled back nonces.
    pub async fn reorg_to(&self, to_block: u64) -> Result<usize, SequencerError> {
        let (respond_to, recv) = oneshot::channel();
        self.enqueue(SequencingLaneInput::Reorg(PendingReorg {
            to_block,
            respond_to,
        }))
        .await?;

        recv.await
            .map_err(|_| SequencerError::internal("sequencing lane dropped response"))?
    }
}

#[async_trait]
impl TransactionPublisher for SequencerHandle {
    async fn publish_transaction(
        &self,
        raw: Bytes,
        timeboosted: bool,
    ) -> Result<SequencedReceipt, SequencerError> {
        let (respond_to, recv) = oneshot::channel();
        self.enqueue(SequencingLaneInput::Tx(PendingTx {
            raw,
            timeboosted,
            respond_to,
            received_at: SystemTime::now(),
        }))
        .await?;

        recv.await
            .map_err(|_| SequencerError::internal("sequencing lane dropped response"))?
    }
}
