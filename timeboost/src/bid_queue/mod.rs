// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Durable hand-off of validated bids from bid validators to the auctioneer.
//!
//! Bids stay queued until the auctioneer acknowledges their round, which it does only
//! after the contract reports the round as resolved. An auctioneer that restarts mid-round
//! therefore sees every bid again.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, Bytes, U256};
use rusqlite::{Connection, ErrorCode, Row, TransactionBehavior, params};
use rusqlite_migration::{M, Migrations};
use thiserror::Error;
use timeboost_core::Bid;

use crate::storage::{StorageOpenError, Storage};

const MIGRATION_0001_BIDS: &str = include_str!("migrations/0001_bids.sql");

const SQL_COUNT_BIDS: &str = "SELECT COUNT(*) FROM bids";
const SQL_SELECT_BID_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM bids WHERE round = ?1 AND bidder = ?2 AND signature = ?3)";
const SQL_INSERT_BID: &str = "INSERT OR IGNORE INTO bids \
     (round, bidder, chain_id, auction_contract, express_lane_controller, amount, signature, enqueued_at_ms) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
const SQL_SELECT_BIDS_FOR_ROUND: &str = "SELECT bidder, chain_id, auction_contract, \
     express_lane_controller, round, amount, signature FROM bids WHERE round = ?1 ORDER BY id ASC";
const SQL_DELETE_BIDS_UP_TO_ROUND: &str = "DELETE FROM bids WHERE round <= ?1";

#[derive(Debug, Error)]
pub enum BidQueueError {
    #[error("bid queue full ({capacity} bids)")]
    Full { capacity: usize },
    #[error("bid queue busy")]
    Busy,
    #[error("bid queue storage error")]
    Storage(#[from] rusqlite::Error),
    #[error("bid queue worker failed: {0}")]
    Worker(String),
    #[error("malformed queued bid: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The same signed bid was already queued; nothing changed.
    Duplicate,
}

pub struct BidQueue {
    conn: Connection,
    capacity: usize,
}

impl BidQueue {
    pub fn open(path: &str, capacity: usize) -> Result<Self, StorageOpenError> {
        let mut conn = Storage::open_connection(path, "NORMAL")?;
        Self::run_migrations(&mut conn)?;
        Ok(Self { conn, capacity })
    }

    pub fn run_migrations(conn: &mut Connection) -> Result<(), StorageOpenError> {
        Migrations::from_slice(&[M::up(MIGRATION_0001_BIDS)]).to_latest(conn)?;
        Ok(())
    }

    pub fn enqueue(&mut self, bid: &Bid) -> Result<EnqueueOutcome, BidQueueError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_busy)?;

        // Redelivery of a queued bid succeeds even when the queue is full.
        let exists: bool = tx.query_row(
            SQL_SELECT_BID_EXISTS,
            params![
                u64_to_i64(bid.round),
                bid.bidder.as_slice(),
                bid.signature.as_ref()
            ],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let queued: i64 = tx.query_row(SQL_COUNT_BIDS, [], |row| row.get(0))?;
        if usize::try_from(queued).unwrap_or(usize::MAX) >= self.capacity {
            return Err(BidQueueError::Full {
                capacity: self.capacity,
            });
        }

        let inserted = tx.execute(
            SQL_INSERT_BID,
            params![
                u64_to_i64(bid.round),
                bid.bidder.as_slice(),
                u64_to_i64(bid.chain_id),
                bid.auction_contract_address.as_slice(),
                bid.express_lane_controller.as_slice(),
                bid.amount.to_be_bytes::<32>().as_slice(),
                bid.signature.as_ref(),
                unix_ms(SystemTime::now()),
            ],
        )?;
        tx.commit().map_err(map_busy)?;

        Ok(if inserted == 0 {
            EnqueueOutcome::Duplicate
        } else {
            EnqueueOutcome::Enqueued
        })
    }

    /// Every queued bid for `round`, in arrival order.
    pub fn bids_for_round(&mut self, round: u64) -> Result<Vec<Bid>, BidQueueError> {
        let mut stmt = self.conn.prepare_cached(SQL_SELECT_BIDS_FOR_ROUND)?;
        let rows = stmt.query_map(params![u64_to_i64(round)], convert_row_to_bid)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Drops the bids of `round` and of every earlier round. Returns the removed count.
    pub fn ack_round(&mut self, round: u64) -> Result<usize, BidQueueError> {
        self.conn
            .execute(SQL_DELETE_BIDS_UP_TO_ROUND, params![u64_to_i64(round)])
            .map_err(map_busy)
    }

    /// Number of bids waiting for acknowledgement.
    pub fn depth(&mut self) -> Result<usize, BidQueueError> {
        let queued: i64 = self.conn.query_row(SQL_COUNT_BIDS, [], |row| row.get(0))?;
        Ok(usize::try_from(queued).unwrap_or(usize::MAX))
    }
}

/// Async front for [`BidQueue`]; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SharedBidQueue {
    inner: Arc<Mutex<BidQueue>>,
}

impl SharedBidQueue {
    pub fn new(queue: BidQueue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, BidQueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut BidQueue) -> Result<T, BidQueueError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut queue = inner
                .lock()
                .map_err(|_| BidQueueError::Worker("bid queue lock poisoned".to_string()))?;
            op(&mut queue)
        })
        .await
        .map_err(|err| BidQueueError::Worker(err.to_string()))?
    }

    pub async fn enqueue(&self, bid: Bid) -> Result<EnqueueOutcome, BidQueueError> {
        self.run(move |queue| queue.enqueue(&bid)).await
    }

    pub async fn bids_for_round(&self, round: u64) -> Result<Vec<Bid>, BidQueueError> {
        self.run(move |queue| queue.bids_for_round(round)).await
    }

    pub async fn ack_round(&self, round: u64) -> Result<usize, BidQueueError> {
        self.run(move |queue| queue.ack_round(round)).await
    }

    pub async fn depth(&self) -> Result<usize, BidQueueError> {
        self.run(|queue| queue.depth()).await
    }
}

fn convert_row_to_bid(row: &Row<'_>) -> rusqlite::Result<Result<Bid, BidQueueError>> {
    let bidder: Vec<u8> = row.get(0)?;
    let chain_id: i64 = row.get(1)?;
    let contract: Vec<u8> = row.get(2)?;
    let controller: Vec<u8> = row.get(3)?;
    let round: i64 = row.get(4)?;
    let amount: Vec<u8> = row.get(5)?;
    let signature: Vec<u8> = row.get(6)?;

    Ok(decode_bid(
        &bidder, chain_id, &contract, &controller, round, &amount, signature,
    ))
}

fn decode_bid(
    bidder: &[u8],
    chain_id: i64,
    contract: &[u8],
    controller: &[u8],
    round: i64,
    amount: &[u8],
    signature: Vec<u8>,
) -> Result<Bid, BidQueueError> {
    Ok(Bid {
        bidder: read_address(bidder)?,
        chain_id: i64_to_u64(chain_id),
        auction_contract_address: read_address(contract)?,
        express_lane_controller: read_address(controller)?,
        round: i64_to_u64(round),
        amount: U256::try_from_be_slice(amount)
            .ok_or_else(|| BidQueueError::Malformed("amount wider than 256 bits".to_string()))?,
        signature: Bytes::from(signature),
    })
}

fn read_address(bytes: &[u8]) -> Result<Address, BidQueueError> {
    if bytes.len() != 20 {
        return Err(BidQueueError::Malformed(format!(
            "address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(bytes))
}

fn map_busy(err: rusqlite::Error) -> BidQueueError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => BidQueueError::Busy,
        _ => BidQueueError::Storage(err),
    }
}

fn unix_ms(value: SystemTime) -> i64 {
    let millis = value
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn i64_to_u64(value: i64) -> u64 {
    value.max(0) as u64
}
