// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Stateless admission of auction bids.
//!
//! Any number of validators may run side by side; they only share the bid queue and the
//! contract they read from.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use thiserror::Error;
use timeboost_core::{Bid, RoundTimingInfo};
use tracing::debug;

use crate::auction_contract::{AuctionContract, ContractError};
use crate::bid_queue::{BidQueueError, EnqueueOutcome, SharedBidQueue};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
pub struct BidValidatorConfig {
    pub chain_id: u64,
    pub auction_contract_address: Address,
    /// Lower bound applied on top of the contract's reserve price.
    pub min_reserve_price: U256,
}

#[derive(Debug, Error)]
pub enum BidValidationError {
    #[error("{0}")]
    InvalidSignature(String),
    #[error("{0}")]
    Misconfigured(String),
    #[error("bid targets round {got}, expected {expected}")]
    WrongRound { expected: u64, got: u64 },
    #[error("bidding for round {round} is closed")]
    BiddingClosed { round: u64 },
    #[error("bid amount {amount} exceeds deposit {balance}")]
    InsufficientFunds { amount: U256, balance: U256 },
    #[error("bid amount {amount} below reserve price {reserve}")]
    BelowReservePrice { amount: U256, reserve: U256 },
    #[error("cannot read auction contract: {0}")]
    Contract(#[from] ContractError),
    #[error("bid queue unavailable: {0}")]
    QueueUnavailable(#[from] BidQueueError),
}

pub struct BidValidator {
    config: BidValidatorConfig,
    timing: RoundTimingInfo,
    contract: Arc<dyn AuctionContract>,
    queue: SharedBidQueue,
    clock: Arc<dyn Clock>,
}

impl BidValidator {
    pub fn new(
        config: BidValidatorConfig,
        timing: RoundTimingInfo,
        contract: Arc<dyn AuctionContract>,
        queue: SharedBidQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            timing,
            contract,
            queue,
            clock,
        }
    }

    pub fn timing(&self) -> &RoundTimingInfo {
        &self.timing
    }

    /// Runs every admission check in order and queues the bid for the auctioneer.
    /// Resubmitting an accepted bid succeeds without queueing it twice.
    pub async fn validate_and_enqueue(&self, bid: Bid) -> Result<EnqueueOutcome, BidValidationError> {
        self.validate(&bid).await?;
        let round = bid.round;
        let bidder = bid.bidder;
        let outcome = self.queue.enqueue(bid).await?;
        debug!(round, %bidder, ?outcome, "bid accepted");
        Ok(outcome)
    }

    pub async fn validate(&self, bid: &Bid) -> Result<(), BidValidationError> {
        let signer = bid
            .recover_signer()
            .map_err(|err| BidValidationError::InvalidSignature(err.to_string()))?;
        if signer != bid.bidder {
            return Err(BidValidationError::InvalidSignature(format!(
                "signature recovers {signer}, bid claims {}",
                bid.bidder
            )));
        }

        if bid.chain_id != self.config.chain_id {
            return Err(BidValidationError::Misconfigured(format!(
                "chain id {} does not match {}",
                bid.chain_id, self.config.chain_id
            )));
        }
        if bid.auction_contract_address != self.config.auction_contract_address {
            return Err(BidValidationError::Misconfigured(format!(
                "auction contract {} does not match {}",
                bid.auction_contract_address, self.config.auction_contract_address
            )));
        }

        let now = self.clock.now();
        let upcoming = self.timing.current_round(now).saturating_add(1);
        if bid.round != upcoming {
            return Err(BidValidationError::WrongRound {
                expected: upcoming,
                got: bid.round,
            });
        }
        if self.timing.is_auction_round_closed(now) {
            return Err(BidValidationError::BiddingClosed { round: bid.round });
        }

        let balance = self.contract.deposit_balance(bid.bidder).await?;
        if balance < bid.amount {
            return Err(BidValidationError::InsufficientFunds {
                amount: bid.amount,
                balance,
            });
        }

        let reserve = self
            .contract
            .reserve_price()
            .await?
            .max(self.config.min_reserve_price);
        if bid.amount < reserve {
            return Err(BidValidationError::BelowReservePrice {
                amount: bid.amount,
                reserve,
            });
        }

        Ok(())
    }
}
