// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Express-lane timeboost services.
//!
//! Flow: bidder -> bid validator -> bid queue -> auctioneer -> auction contract ->
//! resolution watcher -> express lane service -> sequencing lane -> SQLite.
//! The sequencing lane is the single writer that orders transactions and sets the
//! timeboosted bit of each block.
pub mod api;
pub mod auction_contract;
pub mod auctioneer;
pub mod bid_queue;
pub mod bid_validator;
pub mod block_metadata;
pub mod client;
pub mod clock;
pub mod express_lane;
pub mod sequencing_lane;
pub mod storage;
