// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::HashMap;
use std::time::SystemTime;

use alloy_primitives::{Address, B256};
use rusqlite::{Connection, Result, TransactionBehavior};
use rusqlite_migration::{M, Migrations};
use timeboost_core::BlockMetadata;

use super::sql::{
    sql_delete_blocks_after, sql_delete_missing_block_metadata, sql_insert_block,
    sql_insert_missing_for_blocks_without_metadata, sql_insert_sequenced_txs_batch,
    sql_select_block_metadata_range, sql_select_max_block_number, sql_select_max_nonce_per_sender,
    sql_select_missing_block_metadata, sql_select_tx_location, sql_upsert_block_metadata,
};
use super::{SequencedTx, StorageOpenError, TxLocation};

const MIGRATION_0001_SCHEMA: &str = include_str!("migrations/0001_schema.sql");

/// Block numbers start here; block zero is reserved for genesis.
pub const FIRST_BLOCK_NUMBER: u64 = 1;

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &str, synchronous: &str) -> std::result::Result<Self, StorageOpenError> {
        let conn = Self::open_connection_with_migrations(path, synchronous)?;
        Ok(Self { conn })
    }

    pub fn open_connection(
        path: &str,
        synchronous: &str,
    ) -> std::result::Result<Connection, StorageOpenError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", synchronous)?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(conn)
    }

    pub fn open_connection_with_migrations(
        path: &str,
        synchronous: &str,
    ) -> std::result::Result<Connection, StorageOpenError> {
        let mut conn = Self::open_connection(path, synchronous)?;
        Self::run_migrations(&mut conn)?;
        Ok(conn)
    }

    pub fn run_migrations(conn: &mut Connection) -> std::result::Result<(), StorageOpenError> {
        Migrations::from_slice(&[M::up(MIGRATION_0001_SCHEMA)]).to_latest(conn)?;
        Ok(())
    }

    pub fn latest_block_number(&mut self) -> Result<Option<u64>> {
        Ok(sql_select_max_block_number(&self.conn)?.map(i64_to_u64))
    }

    pub fn next_block_number(&mut self) -> Result<u64> {
        Ok(self
            .latest_block_number()?
            .map_or(FIRST_BLOCK_NUMBER, |latest| latest.saturating_add(1)))
    }

    /// Writes one block holding `txs` in order, plus its timeboosted metadata, and returns
    /// the assigned block number.
    pub fn append_block(&mut self, created_at: SystemTime, txs: &[SequencedTx]) -> Result<u64> {
        self.append_block_tracking_metadata_from(created_at, txs, FIRST_BLOCK_NUMBER)
    }

    /// Like [`Storage::append_block`], but metadata is written only when the new block is at
    /// or above `track_metadata_from`.
    pub fn append_block_tracking_metadata_from(
        &mut self,
        created_at: SystemTime,
        txs: &[SequencedTx],
        track_metadata_from: u64,
    ) -> Result<u64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Derive the number inside the write transaction so concurrent writers cannot
        // hand out the same block.
        let block_number = sql_select_max_block_number(&tx)?
            .map_or(FIRST_BLOCK_NUMBER, |latest| i64_to_u64(latest).saturating_add(1));
        let block_number_i64 = u64_to_i64(block_number);

        sql_insert_block(&tx, block_number_i64, created_at, txs.len())?;
        sql_insert_sequenced_txs_batch(&tx, block_number_i64, txs)?;

        if block_number >= track_metadata_from {
            let flags: Vec<bool> = txs.iter().map(|value| value.timeboosted).collect();
            let metadata = BlockMetadata::from_timeboosted(&flags);
            sql_upsert_block_metadata(&tx, block_number_i64, metadata.as_bytes())?;
            sql_delete_missing_block_metadata(&tx, block_number_i64)?;
        }

        tx.commit()?;
        Ok(block_number)
    }

    /// Next expected nonce for every sender that has at least one sequenced transaction.
    pub fn load_sender_next_nonces(&mut self) -> Result<HashMap<Address, u64>> {
        let rows = sql_select_max_nonce_per_sender(&self.conn)?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            if row.sender.len() != 20 {
                continue;
            }
            out.insert(
                Address::from_slice(&row.sender),
                i64_to_u64(row.max_nonce).saturating_add(1),
            );
        }
        Ok(out)
    }

    pub fn transaction_location(&mut self, tx_hash: &B256) -> Result<Option<TxLocation>> {
        Ok(
            sql_select_tx_location(&self.conn, tx_hash.as_slice())?.map(|row| TxLocation {
                block_number: i64_to_u64(row.block_number),
                tx_index: i64_to_u32(row.tx_index),
                timeboosted: row.timeboosted,
            }),
        )
    }

    /// Stored metadata for blocks in `[from_inclusive, to_inclusive]`, ascending. Blocks
    /// without metadata are skipped.
    pub fn block_metadata_range(
        &mut self,
        from_inclusive: u64,
        to_inclusive: u64,
    ) -> Result<Vec<(u64, BlockMetadata)>> {
        if from_inclusive > to_inclusive {
            return Ok(Vec::new());
        }
        let rows = sql_select_block_metadata_range(
            &self.conn,
            u64_to_i64(from_inclusive),
            u64_to_i64(to_inclusive),
        )?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    i64_to_u64(row.block_number),
                    BlockMetadata::from_raw(row.raw),
                )
            })
            .collect())
    }

    /// Persists fetched metadata and clears the matching missing-metadata markers atomically.
    pub fn store_block_metadata(&mut self, entries: &[(u64, BlockMetadata)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (block_number, metadata) in entries {
            let block_number = u64_to_i64(*block_number);
            sql_upsert_block_metadata(&tx, block_number, metadata.as_bytes())?;
            sql_delete_missing_block_metadata(&tx, block_number)?;
        }
        tx.commit()
    }

    /// Marks every stored block at or above `from_inclusive` that has no metadata as missing.
    /// Returns how many markers were added.
    pub fn mark_blocks_without_metadata_missing(&mut self, from_inclusive: u64) -> Result<usize> {
        sql_insert_missing_for_blocks_without_metadata(&self.conn, u64_to_i64(from_inclusive))
    }

    /// Up to `limit` missing block numbers, ascending.
    pub fn missing_block_metadata(&mut self, limit: usize) -> Result<Vec<u64>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(sql_select_missing_block_metadata(&self.conn, limit)?
            .into_iter()
            .map(i64_to_u64)
            .collect())
    }

    /// Removes every block above `block_number`. Returns the number of dropped blocks.
    pub fn reorg_to(&mut self, block_number: u64) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let dropped = sql_delete_blocks_after(&tx, u64_to_i64(block_number))?;
        tx.commit()?;
        Ok(dropped)
    }
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn i64_to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn i64_to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
