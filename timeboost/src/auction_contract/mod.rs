// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Access to the on-chain express-lane auction contract.
//!
//! [`RpcAuctionContract`] talks to a deployed contract through an alloy provider;
//! [`InMemoryAuctionContract`] keeps the same state in process for local runs and tests.

mod memory;
mod rpc;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use timeboost_core::{Bid, RoundTimingError, RoundTimingInfo};

pub use memory::InMemoryAuctionContract;
pub use rpc::{RpcAuctionContract, RpcAuctionContractConfig};

/// Outcome of a resolved round as recorded by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionResolution {
    pub round: u64,
    pub winner: Address,
    pub express_lane_controller: Address,
    /// Amount charged to the winner.
    pub price: U256,
    pub tx_hash: Option<B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRound {
    pub round: u64,
    pub express_lane_controller: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionResolvedEvent {
    pub round: u64,
    pub is_multi_bid_auction: bool,
    pub first_price_bidder: Address,
    pub express_lane_controller: Address,
    pub first_price_amount: U256,
    pub price: U256,
    pub block_number: u64,
    pub tx_hash: Option<B256>,
}

impl AuctionResolvedEvent {
    pub fn to_resolution(&self) -> AuctionResolution {
        AuctionResolution {
            round: self.round,
            winner: self.first_price_bidder,
            express_lane_controller: self.express_lane_controller,
            price: self.price,
            tx_hash: self.tx_hash,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("contract call failed: {0}")]
    Transport(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("no wallet configured for contract writes")]
    MissingWallet,
    #[error("wallet {wallet} cannot act for {requested}")]
    WalletMismatch { wallet: Address, requested: Address },
    #[error(transparent)]
    Timing(#[from] RoundTimingError),
}

impl From<alloy::contract::Error> for ContractError {
    fn from(value: alloy::contract::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

#[async_trait]
pub trait AuctionContract: Send + Sync {
    async fn round_timing_info(&self) -> Result<RoundTimingInfo, ContractError>;

    async fn reserve_price(&self) -> Result<U256, ContractError>;

    /// Funds `bidder` has deposited and not yet spent or withdrawn.
    async fn deposit_balance(&self, bidder: Address) -> Result<U256, ContractError>;

    /// Resolution of `round`, if the contract has recorded one.
    async fn resolution(&self, round: u64) -> Result<Option<AuctionResolution>, ContractError>;

    /// The rounds the contract currently marks as resolved, newest first.
    async fn resolved_rounds(&self) -> Result<Vec<ResolvedRound>, ContractError>;

    /// Submits the winning bid and, when present, the runner-up used for pricing.
    async fn resolve_auction(
        &self,
        first: &Bid,
        second: Option<&Bid>,
    ) -> Result<AuctionResolution, ContractError>;

    async fn deposit(&self, depositor: Address, amount: U256) -> Result<B256, ContractError>;

    async fn latest_block_number(&self) -> Result<u64, ContractError>;

    /// `AuctionResolved` events emitted in `[from_block, to_block]`.
    async fn auction_resolved_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<AuctionResolvedEvent>, ContractError>;
}
