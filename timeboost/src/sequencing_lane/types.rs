// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::SystemTime;

use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct PendingTx {
    pub raw: Bytes,
    pub timeboosted: bool,
    pub respond_to: oneshot::Sender<Result<SequencedReceipt, SequencerError>>,
    pub received_at: SystemTime,
}

/// Rollback of the sequenced chain to `to_block`; answers with the number of dropped blocks.
#[derive(Debug)]
pub struct PendingReorg {
    pub to_block: u64,
    pub respond_to: oneshot::Sender<Result<usize, SequencerError>>,
}

#[derive(Debug)]
pub enum SequencingLaneInput {
    Tx(PendingTx),
    Reorg(PendingReorg),
}

/// Where a transaction landed once its block is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedReceipt {
    pub tx_hash: B256,
    pub sender: Address,
    pub nonce: u64,
    pub block_number: u64,
    pub tx_index: u32,
    pub timeboosted: bool,
}

#[derive(Debug, Error, Clone)]
pub enum SequencerError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Overloaded(String),
}

impl SequencerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::Overloaded(message.into())
    }
}
