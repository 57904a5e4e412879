// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::cmp::Ordering;

use alloy_primitives::{Address, Bytes, U256};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::signing::{self, SigningError};
use crate::submission::domain_value;

/// A signed offer by `bidder` to pay `amount` for control of the express lane in `round`.
///
/// `express_lane_controller` is the address that receives the rights if the bid wins; it
/// is usually the bidder itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub bidder: Address,
    pub chain_id: u64,
    pub auction_contract_address: Address,
    pub express_lane_controller: Address,
    pub round: u64,
    pub amount: U256,
    #[serde(default)]
    pub signature: Bytes,
}

impl Bid {
    /// `domain || chain_id(32) || contract(20) || round(8) || amount(32) || controller(20)`.
    pub fn to_message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 20 + 8 + 32 + 20);
        buf.extend_from_slice(domain_value().as_slice());
        buf.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        buf.extend_from_slice(self.auction_contract_address.as_slice());
        buf.extend_from_slice(&self.round.to_be_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes::<32>());
        buf.extend_from_slice(self.express_lane_controller.as_slice());
        buf
    }

    pub fn sign(mut self, key: &SigningKey) -> Result<Self, SigningError> {
        let signature = signing::sign_message(key, &self.to_message_bytes())?;
        self.signature = Bytes::copy_from_slice(&signature.as_bytes());
        Ok(self)
    }

    pub fn recover_signer(&self) -> Result<Address, SigningError> {
        signing::recover_signer(&self.to_message_bytes(), &self.signature)
    }

    /// Auction ranking: higher amount first, then smaller bidder address.
    ///
    /// Any replica sorting the same set of bids agrees on the order regardless of
    /// arrival order.
    pub fn rank(&self, other: &Self) -> Ordering {
        other
            .amount
            .cmp(&self.amount)
            .then_with(|| self.bidder.cmp(&other.bidder))
            .then_with(|| self.signature.cmp(&other.signature))
    }
}
