// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes, U256};
use k256::ecdsa::SigningKey;
use timeboost_core::signing::address_of;
use timeboost_core::{Bid, RoundTimingInfo};
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::BidResponse;
use crate::auction_contract::AuctionContract;
use crate::clock::Clock;

use super::{ClientError, post_json};

#[derive(Debug, Clone)]
pub struct BidderClientConfig {
    pub validator_url: String,
    pub chain_id: u64,
    pub auction_contract_address: Address,
}

pub struct BidderClient {
    config: BidderClientConfig,
    key: SigningKey,
    address: Address,
    contract: Arc<dyn AuctionContract>,
    timing: RoundTimingInfo,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    // Local view of the deposit; bids above it are refused without a round trip.
    balance: RwLock<U256>,
}

impl BidderClient {
    /// Builds a client and seeds its balance view from the contract.
    pub async fn connect(
        config: BidderClientConfig,
        key: SigningKey,
        contract: Arc<dyn AuctionContract>,
        timing: RoundTimingInfo,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        let client = Self::new(config, key, contract, timing, clock);
        client.refresh_balance().await?;
        Ok(client)
    }

    /// The balance view starts at zero, so every bid is refused locally until
    /// [`Self::refresh_balance`] or [`Self::deposit`] runs. [`Self::connect`] does the refresh.
    pub fn new(
        config: BidderClientConfig,
        key: SigningKey,
        contract: Arc<dyn AuctionContract>,
        timing: RoundTimingInfo,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let address = address_of(&key);
        Self {
            config,
            key,
            address,
            contract,
            timing,
            clock,
            http: reqwest::Client::new(),
            balance: RwLock::new(U256::ZERO),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn deposit(&self, amount: U256) -> Result<B256, ClientError> {
        let tx_hash = self.contract.deposit(self.address, amount).await?;
        let mut balance = self.balance.write().await;
        *balance = balance.saturating_add(amount);
        Ok(tx_hash)
    }

    /// Replaces the cached balance with the contract's. Charges for won rounds only show
    /// up after a refresh.
    pub async fn refresh_balance(&self) -> Result<U256, ClientError> {
        let current = self.contract.deposit_balance(self.address).await?;
        *self.balance.write().await = current;
        Ok(current)
    }

    pub async fn balance(&self) -> U256 {
        *self.balance.read().await
    }

    /// Signs and submits a bid for the upcoming round. The controller defaults to the
    /// bidder itself.
    pub async fn bid(
        &self,
        amount: U256,
        express_lane_controller: Option<Address>,
    ) -> Result<Bid, ClientError> {
        let balance = self.balance().await;
        if amount > balance {
            return Err(ClientError::InsufficientBalance { amount, balance });
        }
        let round = self
            .timing
            .current_round(self.clock.now())
            .saturating_add(1);
        let bid = Bid {
            bidder: self.address,
            chain_id: self.config.chain_id,
            auction_contract_address: self.config.auction_contract_address,
            express_lane_controller: express_lane_controller.unwrap_or(self.address),
            round,
            amount,
            signature: Bytes::new(),
        }
        .sign(&self.key)?;

        let url = format!("{}/bid", self.config.validator_url.trim_end_matches('/'));
        let response: BidResponse = post_json(&self.http, &url, &bid).await?;
        debug!(round, %amount, duplicate = response.duplicate, "bid submitted");
        Ok(bid)
    }
}
