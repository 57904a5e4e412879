// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod db;
mod sql;

use std::time::SystemTime;

use alloy_primitives::{Address, B256};
use thiserror::Error;

pub use db::{FIRST_BLOCK_NUMBER, Storage};

/// A transaction accepted by the sequencing lane, ready to be written into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedTx {
    pub tx_hash: B256,
    pub sender: Address,
    pub nonce: u64,
    pub raw: Vec<u8>,
    pub timeboosted: bool,
    pub received_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block_number: u64,
    pub tx_index: u32,
    pub timeboosted: bool,
}

#[derive(Debug, Error)]
pub enum StorageOpenError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Migration(#[from] rusqlite_migration::Error),
}
