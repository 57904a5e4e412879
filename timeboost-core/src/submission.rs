// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::signing::{self, SigningError};

/// Domain tag mixed into every signed timeboost message.
pub const TIMEBOOST_DOMAIN_TAG: &[u8] = b"TIMEBOOST_BID";

pub fn domain_value() -> B256 {
    keccak256(TIMEBOOST_DOMAIN_TAG)
}

/// A raw transaction submitted through the express lane by the round controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressLaneSubmission {
    pub chain_id: u64,
    pub round: u64,
    pub auction_contract_address: Address,
    pub transaction: Bytes,
    pub sequence: u64,
    #[serde(default)]
    pub signature: Bytes,
}

impl ExpressLaneSubmission {
    /// Canonical bytes covered by the signature:
    /// `domain || chain_id(32) || contract(20) || round(8) || sequence(8) || transaction`.
    pub fn to_message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 32 + 20 + 8 + 8 + self.transaction.len());
        buf.extend_from_slice(domain_value().as_slice());
        buf.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        buf.extend_from_slice(self.auction_contract_address.as_slice());
        buf.extend_from_slice(&self.round.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.transaction);
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
}
