// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use rusqlite::{Connection, OptionalExtension, Result, Row, Transaction, params};
use std::time::{SystemTime, UNIX_EPOCH};

use super::SequencedTx;

const SQL_SELECT_MAX_BLOCK_NUMBER: &str = "SELECT MAX(block_number) FROM blocks";
const SQL_INSERT_BLOCK: &str =
    "INSERT INTO blocks (block_number, created_at_ms, tx_count) VALUES (?1, ?2, ?3)";
const SQL_INSERT_SEQUENCED_TX: &str = "INSERT INTO sequenced_txs \
     (block_number, tx_index, tx_hash, sender, nonce, raw, timeboosted, received_at_ms) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
const SQL_UPSERT_BLOCK_METADATA: &str =
    "INSERT OR REPLACE INTO block_metadata (block_number, raw) VALUES (?1, ?2)";
const SQL_SELECT_BLOCK_METADATA_RANGE: &str = "SELECT block_number, raw FROM block_metadata \
     WHERE block_number >= ?1 AND block_number <= ?2 ORDER BY block_number ASC";
const SQL_INSERT_MISSING_FOR_BLOCKS_WITHOUT_METADATA: &str =
    "INSERT OR IGNORE INTO missing_block_metadata (block_number) \
     SELECT b.block_number FROM blocks b WHERE b.block_number >= ?1 \
     AND NOT EXISTS (SELECT 1 FROM block_metadata m WHERE m.block_number = b.block_number)";
const SQL_DELETE_MISSING_BLOCK_METADATA: &str =
    "DELETE FROM missing_block_metadata WHERE block_number = ?1";
const SQL_SELECT_MISSING_BLOCK_METADATA: &str =
    "SELECT block_number FROM missing_block_metadata ORDER BY block_number ASC LIMIT ?1";
const SQL_SELECT_MAX_NONCE_PER_SENDER: &str =
    "SELECT sender, MAX(nonce) FROM sequenced_txs GROUP BY sender";
const SQL_SELECT_TX_LOCATION: &str = "SELECT block_number, tx_index, timeboosted \
     FROM sequenced_txs WHERE tx_hash = ?1 ORDER BY block_number DESC LIMIT 1";

#[derive(Debug, Clone)]
pub(super) struct BlockMetadataRow {
    pub block_number: i64,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(super) struct SenderNonceRow {
    pub sender: Vec<u8>,
    pub max_nonce: i64,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct TxLocationRow {
    pub block_number: i64,
    pub tx_index: i64,
    pub timeboosted: bool,
}

pub(super) fn sql_select_max_block_number(conn: &Connection) -> Result<Option<i64>> {
    conn.query_row(SQL_SELECT_MAX_BLOCK_NUMBER, [], |row| row.get(0))
}

pub(super) fn sql_insert_block(
    tx: &Transaction<'_>,
    block_number: i64,
    created_at: SystemTime,
    tx_count: usize,
) -> Result<()> {
    tx.execute(
        SQL_INSERT_BLOCK,
        params![
            block_number,
            system_time_to_unix_ms(created_at),
            i64::try_from(tx_count).unwrap_or(i64::MAX)
        ],
    )?;
    Ok(())
}

pub(super) fn sql_insert_sequenced_txs_batch(
    tx: &Transaction<'_>,
    block_number: i64,
    txs: &[SequencedTx],
) -> Result<()> {
    let mut stmt = tx.prepare_cached(SQL_INSERT_SEQUENCED_TX)?;
    for (tx_index, value) in txs.iter().enumerate() {
        stmt.execute(params![
            block_number,
            i64::try_from(tx_index).unwrap_or(i64::MAX),
            value.tx_hash.as_slice(),
            value.sender.as_slice(),
            i64::try_from(value.nonce).unwrap_or(i64::MAX),
            value.raw.as_slice(),
            value.timeboosted,
            system_time_to_unix_ms(value.received_at),
        ])?;
    }
    Ok(())
}

pub(super) fn sql_upsert_block_metadata(
    conn: &Connection,
    block_number: i64,
    raw: &[u8],
) -> Result<()> {
    conn.prepare_cached(SQL_UPSERT_BLOCK_METADATA)?
        .execute(params![block_number, raw])?;
    Ok(())
}

pub(super) fn sql_select_block_metadata_range(
    conn: &Connection,
    from_inclusive: i64,
    to_inclusive: i64,
) -> Result<Vec<BlockMetadataRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_BLOCK_METADATA_RANGE)?;
    let mapped = stmt.query_map(
        params![from_inclusive, to_inclusive],
        convert_row_to_block_metadata_row,
    )?;
    mapped.collect()
}

pub(super) fn sql_insert_missing_for_blocks_without_metadata(
    conn: &Connection,
    from_inclusive: i64,
) -> Result<usize> {
    conn.prepare_cached(SQL_INSERT_MISSING_FOR_BLOCKS_WITHOUT_METADATA)?
        .execute(params![from_inclusive])
}

pub(super) fn sql_delete_missing_block_metadata(conn: &Connection, block_number: i64) -> Result<()> {
    conn.prepare_cached(SQL_DELETE_MISSING_BLOCK_METADATA)?
        .execute(params![block_number])?;
    Ok(())
}

pub(super) fn sql_select_missing_block_metadata(conn: &Connection, limit: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_MISSING_BLOCK_METADATA)?;
    let mapped = stmt.query_map(params![limit], |row| row.get(0))?;
    mapped.collect()
}

pub(super) fn sql_select_max_nonce_per_sender(conn: &Connection) -> Result<Vec<SenderNonceRow>> {
    let mut stmt = conn.prepare_cached(SQL_SELECT_MAX_NONCE_PER_SENDER)?;
    let mapped = stmt.query_map([], |row| {
        Ok(SenderNonceRow {
            sender: row.get(0)?,
            max_nonce: row.get(1)?,
        })
    })?;
    mapped.collect()
}

pub(super) fn sql_select_tx_location(
    conn: &Connection,
    tx_hash: &[u8],
) -> Result<Option<TxLocationRow>> {
    conn.query_row(SQL_SELECT_TX_LOCATION, params![tx_hash], |row| {
        Ok(TxLocationRow {
            block_number: row.get(0)?,
            tx_index: row.get(1)?,
            timeboosted: row.get(2)?,
        })
    })
    .optional()
}

/// Drops every block strictly above `block_number`, together with its metadata.
pub(super) fn sql_delete_blocks_after(tx: &Transaction<'_>, block_number: i64) -> Result<usize> {
    tx.execute(
        "DELETE FROM missing_block_metadata WHERE block_number > ?1",
        params![block_number],
    )?;
    tx.execute(
        "DELETE FROM block_metadata WHERE block_number > ?1",
        params![block_number],
    )?;
    tx.execute(
        "DELETE FROM sequenced_txs WHERE block_number > ?1",
        params![block_number],
    )?;
    tx.execute(
        "DELETE FROM blocks WHERE block_number > ?1",
        params![block_number],
    )
}

fn convert_row_to_block_metadata_row(row: &Row<'_>) -> Result<BlockMetadataRow> {
    Ok(BlockMetadataRow {
        block_number: row.get(0)?,
        raw: row.get(1)?,
    })
}

fn system_time_to_unix_ms(value: SystemTime) -> i64 {
    let millis = value
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
