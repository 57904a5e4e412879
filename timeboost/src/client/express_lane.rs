// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use k256::ecdsa::SigningKey;
use timeboost_core::signing::address_of;
use timeboost_core::{ExpressLaneSubmission, RoundTimingInfo};
use tokio::sync::Mutex;

use crate::api::TxResponse;
use crate::clock::Clock;
use crate::sequencing_lane::SequencedReceipt;

use super::{ClientError, post_json};

#[derive(Debug, Clone)]
pub struct ExpressLaneClientConfig {
    pub sequencer_url: String,
    pub chain_id: u64,
    pub auction_contract_address: Address,
}

#[derive(Debug, Default)]
struct SequenceCursor {
    round: u64,
    next: u64,
}

/// Submits transactions as the express-lane controller.
///
/// Sequence numbers restart at zero every round and advance only when the sequencer
/// accepts a submission, so a rejected submission can be retried with the same number.
pub struct ExpressLaneClient {
    config: ExpressLaneClientConfig,
    key: SigningKey,
    timing: RoundTimingInfo,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    cursor: Mutex<SequenceCursor>,
}

impl ExpressLaneClient {
    pub fn new(
        config: ExpressLaneClientConfig,
        key: SigningKey,
        timing: RoundTimingInfo,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            key,
            timing,
            clock,
            http: reqwest::Client::new(),
            cursor: Mutex::new(SequenceCursor::default()),
        }
    }

    pub fn address(&self) -> Address {
        address_of(&self.key)
    }

    pub async fn send_transaction(&self, raw: Bytes) -> Result<SequencedReceipt, ClientError> {
        let mut cursor = self.cursor.lock().await;
        let round = self.timing.current_round(self.clock.now());
        if cursor.round != round {
            *cursor = SequenceCursor { round, next: 0 };
        }

        let submission = ExpressLaneSubmission {
            chain_id: self.config.chain_id,
            round,
            auction_contract_address: self.config.auction_contract_address,
            transaction: raw,
            sequence: cursor.next,
            signature: Bytes::new(),
        }
        .sign(&self.key)?;

        let url = format!(
            "{}/express_lane/tx",
            self.config.sequencer_url.trim_end_matches('/')
        );
        let response: TxResponse = post_json(&self.http, &url, &submission).await?;
        cursor.next = cursor.next.saturating_add(1);
        Ok(response.receipt)
    }
}
